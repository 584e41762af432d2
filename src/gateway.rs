//! Remote function invocations — opaque JSON RPCs the control panel issues
//! against the hosted function endpoints (bot control signal, trade engine
//! actions, outbound telegram alerts, VPS health probes).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::FunctionsConfig;
use crate::error::{PitbossError, Result};

/// Signal sent to the remote bot process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BotControlAction {
    Start,
    Stop,
}

impl std::fmt::Display for BotControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotControlResponse {
    pub success: bool,
    #[serde(default)]
    pub ip_address: Option<String>,
}

/// Trade-engine actions used by the control core. Balance sync runs on a
/// timer; the close/cancel/copier trio is the kill-switch path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeEngineAction {
    SyncBalances,
    CloseAllPositions,
    CancelOpenOrders,
    StopCopier,
    FetchTicker {
        symbol: String,
    },
    WalletTransfer {
        asset: String,
        amount: Decimal,
        destination: String,
    },
}

impl TradeEngineAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SyncBalances => "sync-balances",
            Self::CloseAllPositions => "close-all-positions",
            Self::CancelOpenOrders => "cancel-open-orders",
            Self::StopCopier => "stop-copier",
            Self::FetchTicker { .. } => "fetch-ticker",
            Self::WalletTransfer { .. } => "wallet-transfer",
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            Self::FetchTicker { symbol } => json!({ "action": self.name(), "symbol": symbol }),
            Self::WalletTransfer {
                asset,
                amount,
                destination,
            } => json!({
                "action": self.name(),
                "asset": asset,
                "amount": amount,
                "destination": destination,
            }),
            _ => json!({ "action": self.name() }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VpsHealthResponse {
    pub healthy: bool,
}

/// Seam for the remote function endpoints.
#[async_trait]
pub trait FunctionGateway: Send + Sync {
    async fn bot_control(
        &self,
        action: BotControlAction,
        deployment_id: &str,
    ) -> Result<BotControlResponse>;

    async fn trade_engine(&self, action: TradeEngineAction) -> Result<serde_json::Value>;

    async fn send_telegram(&self, message: &str) -> Result<()>;

    async fn check_vps_health(&self, ip: &str, provider: Option<&str>)
        -> Result<VpsHealthResponse>;
}

/// HTTP implementation posting JSON bodies to per-function endpoints.
pub struct HttpFunctionGateway {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpFunctionGateway {
    pub fn new(config: &FunctionsConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", config.api_key);
        let mut auth = HeaderValue::from_str(&bearer)
            .map_err(|_| PitbossError::Validation("functions api key is not a valid header".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        let base_url = Url::parse(&config.base_url)?;

        Ok(Self { http, base_url })
    }

    fn endpoint(&self, function: &str) -> Result<Url> {
        self.base_url
            .join(&format!("functions/v1/{function}"))
            .map_err(PitbossError::from)
    }

    async fn invoke(&self, function: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = self.endpoint(function)?;
        debug!(%function, "invoking remote function");

        let response = self.http.post(url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PitbossError::Gateway {
                function: function.to_string(),
                reason: format!("HTTP {status}: {text}"),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl FunctionGateway for HttpFunctionGateway {
    async fn bot_control(
        &self,
        action: BotControlAction,
        deployment_id: &str,
    ) -> Result<BotControlResponse> {
        let body = json!({ "action": action, "deploymentId": deployment_id });
        let value = self.invoke("bot-control", body).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn trade_engine(&self, action: TradeEngineAction) -> Result<serde_json::Value> {
        self.invoke("trade-engine", action.body()).await
    }

    async fn send_telegram(&self, message: &str) -> Result<()> {
        let body = json!({ "action": "send-message", "message": message });
        self.invoke("telegram-bot", body).await?;
        Ok(())
    }

    async fn check_vps_health(
        &self,
        ip: &str,
        provider: Option<&str>,
    ) -> Result<VpsHealthResponse> {
        let body = json!({ "ip": ip, "provider": provider });
        let value = self.invoke("check-vps-health", body).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Gateway for local-only mode: no deployment resolved, no remote host to
/// signal. Control signals succeed as no-ops so the local control state
/// stays usable; health probes report unhealthy.
pub struct NoopFunctionGateway;

#[async_trait]
impl FunctionGateway for NoopFunctionGateway {
    async fn bot_control(
        &self,
        action: BotControlAction,
        deployment_id: &str,
    ) -> Result<BotControlResponse> {
        debug!(%action, %deployment_id, "local-only mode, bot-control is a no-op");
        Ok(BotControlResponse {
            success: true,
            ip_address: None,
        })
    }

    async fn trade_engine(&self, action: TradeEngineAction) -> Result<serde_json::Value> {
        debug!(action = action.name(), "local-only mode, trade-engine is a no-op");
        Ok(json!({ "success": true }))
    }

    async fn send_telegram(&self, _message: &str) -> Result<()> {
        Ok(())
    }

    async fn check_vps_health(
        &self,
        _ip: &str,
        _provider: Option<&str>,
    ) -> Result<VpsHealthResponse> {
        Ok(VpsHealthResponse { healthy: false })
    }
}

/// Alert severity for outbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Info => "\u{2139}\u{fe0f}",
            Self::Warning => "\u{26a0}\u{fe0f}",
            Self::Critical => "\u{1f6a8}",
        }
    }
}

/// Outbound telegram alerts. Send failures are logged and swallowed; an
/// alert must never take down the flow that raised it.
#[derive(Clone)]
pub struct TelegramAlerter {
    gateway: Arc<dyn FunctionGateway>,
    enabled: bool,
}

impl TelegramAlerter {
    pub fn new(gateway: Arc<dyn FunctionGateway>, enabled: bool) -> Self {
        Self { gateway, enabled }
    }

    pub async fn notify(&self, level: AlertLevel, message: &str) {
        if !self.enabled {
            return;
        }
        let text = format!("{} {}", level.prefix(), message);
        if let Err(e) = self.gateway.send_telegram(&text).await {
            warn!(error = %e, "failed to send telegram alert");
        }
    }
}
