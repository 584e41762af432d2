//! Remote structured store seam.
//!
//! The control panel never talks to the persisted store directly; every
//! read, write and change subscription goes through the [`ControlStore`]
//! trait so the sync store, resolver and lifecycle controller can run
//! against the hosted backend, the in-memory local mode, or a test double.

mod memory;
mod realtime;
mod rest;

pub use memory::{MemoryControlStore, OpJournal};
pub use realtime::{RealtimeConfig, RealtimeListener};
pub use rest::RestControlStore;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::{
    AiStatusRecord, DeploymentStatus, ExchangeConnectionRecord, FleetRecord, InstanceRecord,
    NewNotification, NotificationRecord, ProgressRecord, Registry, TradingConfigPatch,
    TradingConfigRecord,
};
use crate::error::Result;

/// Tables the client watches for push-delivered changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchedTable {
    TradingConfig,
    ExchangeConnections,
    Progress,
    Fleet,
    Instances,
    Notifications,
    AiStatus,
}

impl WatchedTable {
    pub const ALL: [WatchedTable; 7] = [
        WatchedTable::TradingConfig,
        WatchedTable::ExchangeConnections,
        WatchedTable::Progress,
        WatchedTable::Fleet,
        WatchedTable::Instances,
        WatchedTable::Notifications,
        WatchedTable::AiStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TradingConfig => "trading_config",
            Self::ExchangeConnections => "exchange_connections",
            Self::Progress => "trading_progress",
            Self::Fleet => "fleet_deployments",
            Self::Instances => "vps_instances",
            Self::Notifications => "notifications",
            Self::AiStatus => "ai_status",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for WatchedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of change delivered by the store's push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A single push-delivered record change.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub table: WatchedTable,
    pub kind: ChangeKind,
    pub record: serde_json::Value,
}

/// Typed access to the remote structured store.
///
/// Read failures are surfaced as errors here; callers are expected to
/// degrade to "no data" rather than crash (see the sync store and the
/// deployment resolver).
#[async_trait]
pub trait ControlStore: Send + Sync {
    /// Point read of the single trading-configuration row.
    async fn fetch_trading_config(&self) -> Result<Option<TradingConfigRecord>>;

    /// Partial update of the trading-configuration row.
    async fn update_trading_config(&self, patch: TradingConfigPatch) -> Result<()>;

    /// Point read of the session-progress row.
    async fn fetch_progress(&self) -> Result<Option<ProgressRecord>>;

    async fn fetch_exchange_connections(&self) -> Result<Vec<ExchangeConnectionRecord>>;

    /// Primary registry, filtered to `status = active`, limit 1.
    async fn fetch_active_fleet_deployment(&self) -> Result<Option<FleetRecord>>;

    /// Legacy registry, filtered to `status = running`, limit 1.
    async fn fetch_running_instance(&self) -> Result<Option<InstanceRecord>>;

    /// Update the status column of a registry row.
    async fn update_registry_status(
        &self,
        registry: Registry,
        row_id: uuid::Uuid,
        status: DeploymentStatus,
    ) -> Result<()>;

    /// Newest-first slice of the notification table.
    async fn fetch_notifications(&self, limit: usize) -> Result<Vec<NotificationRecord>>;

    async fn insert_notification(&self, notification: NewNotification) -> Result<()>;

    async fn fetch_ai_status(&self) -> Result<Option<AiStatusRecord>>;

    /// Subscribe to push-delivered changes for one table. Receivers that
    /// fall behind observe `Lagged` and should trigger a full re-sync.
    fn subscribe(&self, table: WatchedTable) -> broadcast::Receiver<ChangeEvent>;
}
