//! Test doubles shared by the integration tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use pitboss::error::{PitbossError, Result};
use pitboss::gateway::{
    BotControlAction, BotControlResponse, FunctionGateway, TradeEngineAction, VpsHealthResponse,
};
use pitboss::store::OpJournal;

/// Gateway double appending every invocation to the same journal the
/// in-memory store writes to, so tests can assert ordering across the
/// store/gateway boundary.
pub struct RecordingGateway {
    journal: OpJournal,
    failing: Mutex<HashSet<&'static str>>,
    delays: Mutex<Vec<(&'static str, Duration)>>,
}

impl RecordingGateway {
    pub fn new(journal: OpJournal) -> Self {
        Self {
            journal,
            failing: Mutex::new(HashSet::new()),
            delays: Mutex::new(Vec::new()),
        }
    }

    pub fn fail(&self, function: &'static str, failing: bool) {
        let mut set = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing {
            set.insert(function);
        } else {
            set.remove(function);
        }
    }

    pub fn set_delay(&self, function: &'static str, delay: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((function, delay));
    }

    fn record(&self, entry: String) {
        self.journal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    async fn enter(&self, function: &'static str) -> Result<()> {
        let delay = self
            .delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(f, _)| *f == function)
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(function);
        if failing {
            Err(PitbossError::Gateway {
                function: function.to_string(),
                reason: "injected failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl FunctionGateway for RecordingGateway {
    async fn bot_control(
        &self,
        action: BotControlAction,
        deployment_id: &str,
    ) -> Result<BotControlResponse> {
        self.enter("bot-control").await?;
        self.record(format!("gateway.bot_control {action} {deployment_id}"));
        Ok(BotControlResponse {
            success: true,
            ip_address: Some("203.0.113.7".to_string()),
        })
    }

    async fn trade_engine(&self, action: TradeEngineAction) -> Result<serde_json::Value> {
        self.enter("trade-engine").await?;
        self.record(format!("gateway.trade_engine {}", action.name()));
        Ok(json!({ "success": true }))
    }

    async fn send_telegram(&self, _message: &str) -> Result<()> {
        self.enter("telegram-bot").await?;
        self.record("gateway.send_telegram".to_string());
        Ok(())
    }

    async fn check_vps_health(
        &self,
        ip: &str,
        _provider: Option<&str>,
    ) -> Result<VpsHealthResponse> {
        self.enter("check-vps-health").await?;
        self.record(format!("gateway.check_vps_health {ip}"));
        Ok(VpsHealthResponse { healthy: true })
    }
}
