//! HTTP implementation of [`ControlStore`] against the hosted structured
//! store's REST surface.
//!
//! Reads are `GET` with column filters in the query string, writes are
//! `PATCH`/`POST` with `Prefer: return=minimal`. Push events are not
//! produced here; the realtime listener decodes them off the WebSocket and
//! feeds them into this store's broadcast senders so subscribers see one
//! uniform change stream.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::domain::{
    AiStatusRecord, DeploymentStatus, ExchangeConnectionRecord, FleetRecord, InstanceRecord,
    NewNotification, NotificationRecord, ProgressRecord, Registry, TradingConfigPatch,
    TradingConfigRecord,
};
use crate::error::{PitbossError, Result};

use super::{ChangeEvent, ChangeKind, ControlStore, WatchedTable};

const CHANNEL_CAPACITY: usize = 64;

pub struct RestControlStore {
    http: reqwest::Client,
    base_url: Url,
    senders: HashMap<WatchedTable, broadcast::Sender<ChangeEvent>>,
}

impl RestControlStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| PitbossError::Validation("store api key is not a valid header".into()))?;
        headers.insert(HeaderName::from_static("apikey"), api_key);
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| PitbossError::Validation("store api key is not a valid header".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        let base_url = Url::parse(&config.base_url)?;

        let senders = WatchedTable::ALL
            .iter()
            .map(|t| (*t, broadcast::channel(CHANNEL_CAPACITY).0))
            .collect();

        Ok(Self {
            http,
            base_url,
            senders,
        })
    }

    /// Sender the realtime listener publishes decoded events into.
    pub fn change_sender(&self, table: WatchedTable) -> Option<broadcast::Sender<ChangeEvent>> {
        self.senders.get(&table).cloned()
    }

    /// Snapshot of all change senders, keyed by table. Used to wire up a
    /// [`super::RealtimeListener`].
    pub fn change_senders(&self) -> HashMap<WatchedTable, broadcast::Sender<ChangeEvent>> {
        self.senders.clone()
    }

    fn table_url(&self, table: WatchedTable, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base_url.join(&format!("rest/v1/{}", table.as_str()))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        table: WatchedTable,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let url = self.table_url(table, query)?;
        debug!(%table, "store read");
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PitbossError::Store(format!(
                "read of {table} failed: HTTP {status}: {text}"
            )));
        }
        Ok(response.json().await?)
    }

    async fn get_single<T: DeserializeOwned>(
        &self,
        table: WatchedTable,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        let mut rows = self.get_rows::<T>(table, query).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    async fn write<B: Serialize + ?Sized>(
        &self,
        method: Method,
        table: WatchedTable,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<()> {
        let url = self.table_url(table, query)?;
        debug!(%table, ?method, "store write");
        let response = self
            .http
            .request(method, url)
            .header("Prefer", "return=minimal")
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PitbossError::StoreWriteRejected {
                table: table.as_str().to_string(),
                reason: format!("HTTP {status}: {text}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ControlStore for RestControlStore {
    async fn fetch_trading_config(&self) -> Result<Option<TradingConfigRecord>> {
        self.get_single(WatchedTable::TradingConfig, &[("select", "*"), ("limit", "1")])
            .await
    }

    async fn update_trading_config(&self, patch: TradingConfigPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        // Single-row table; the patch applies unconditionally.
        self.write(Method::PATCH, WatchedTable::TradingConfig, &[], &patch)
            .await
    }

    async fn fetch_progress(&self) -> Result<Option<ProgressRecord>> {
        self.get_single(WatchedTable::Progress, &[("select", "*"), ("limit", "1")])
            .await
    }

    async fn fetch_exchange_connections(&self) -> Result<Vec<ExchangeConnectionRecord>> {
        self.get_rows(WatchedTable::ExchangeConnections, &[("select", "*")])
            .await
    }

    async fn fetch_active_fleet_deployment(&self) -> Result<Option<FleetRecord>> {
        self.get_single(
            WatchedTable::Fleet,
            &[("select", "*"), ("status", "eq.active"), ("limit", "1")],
        )
        .await
    }

    async fn fetch_running_instance(&self) -> Result<Option<InstanceRecord>> {
        self.get_single(
            WatchedTable::Instances,
            &[("select", "*"), ("status", "eq.running"), ("limit", "1")],
        )
        .await
    }

    async fn update_registry_status(
        &self,
        registry: Registry,
        row_id: Uuid,
        status: DeploymentStatus,
    ) -> Result<()> {
        let table = match registry {
            Registry::Fleet => WatchedTable::Fleet,
            Registry::Instance => WatchedTable::Instances,
        };
        let filter = format!("eq.{row_id}");
        let body = serde_json::json!({ "status": status });
        self.write(Method::PATCH, table, &[("id", filter.as_str())], &body)
            .await
    }

    async fn fetch_notifications(&self, limit: usize) -> Result<Vec<NotificationRecord>> {
        let limit = limit.to_string();
        self.get_rows(
            WatchedTable::Notifications,
            &[
                ("select", "*"),
                ("order", "created_at.desc"),
                ("limit", limit.as_str()),
            ],
        )
        .await
    }

    async fn insert_notification(&self, notification: NewNotification) -> Result<()> {
        self.write(Method::POST, WatchedTable::Notifications, &[], &notification)
            .await
    }

    async fn fetch_ai_status(&self) -> Result<Option<AiStatusRecord>> {
        self.get_single(WatchedTable::AiStatus, &[("select", "*"), ("limit", "1")])
            .await
    }

    fn subscribe(&self, table: WatchedTable) -> broadcast::Receiver<ChangeEvent> {
        self.senders
            .get(&table)
            .map(|tx| tx.subscribe())
            .unwrap_or_else(|| broadcast::channel(1).1)
    }
}

/// Deliver a decoded push event to this store's subscribers. Free function
/// so the realtime listener can hold only the sender map.
pub(crate) fn publish(
    senders: &HashMap<WatchedTable, broadcast::Sender<ChangeEvent>>,
    table: WatchedTable,
    kind: ChangeKind,
    record: serde_json::Value,
) {
    if let Some(tx) = senders.get(&table) {
        let _ = tx.send(ChangeEvent {
            table,
            kind,
            record,
        });
    }
}
