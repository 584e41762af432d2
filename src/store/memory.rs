//! In-memory [`ControlStore`] implementation.
//!
//! Backs "local-only mode" (no remote store configured) and every test that
//! needs deterministic control over store behavior: per-table fault
//! injection, per-operation latency, and a shared op journal so tests can
//! assert cross-component ordering (e.g. kill-switch clear before the
//! start signal).

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::domain::{
    AiStatusRecord, DeploymentStatus, ExchangeConnectionRecord, FleetRecord, InstanceRecord,
    NewNotification, NotificationRecord, ProgressRecord, Registry, TradingConfigPatch,
    TradingConfigRecord,
};
use crate::error::{PitbossError, Result};

use super::{ChangeEvent, ChangeKind, ControlStore, WatchedTable};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct Tables {
    trading_config: Option<TradingConfigRecord>,
    progress: Option<ProgressRecord>,
    exchanges: Vec<ExchangeConnectionRecord>,
    fleet: Vec<FleetRecord>,
    instances: Vec<InstanceRecord>,
    notifications: Vec<NotificationRecord>,
    ai_status: Option<AiStatusRecord>,
}

/// Shared op journal; the recording gateway used in tests appends to the
/// same journal to capture interleaving across objects.
pub type OpJournal = Arc<Mutex<Vec<String>>>;

pub struct MemoryControlStore {
    tables: RwLock<Tables>,
    senders: HashMap<WatchedTable, broadcast::Sender<ChangeEvent>>,
    journal: OpJournal,
    failing_reads: Mutex<HashSet<WatchedTable>>,
    failing_writes: Mutex<HashSet<WatchedTable>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
}

impl MemoryControlStore {
    pub fn new() -> Self {
        Self::with_journal(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn with_journal(journal: OpJournal) -> Self {
        let senders = WatchedTable::ALL
            .iter()
            .map(|t| (*t, broadcast::channel(CHANNEL_CAPACITY).0))
            .collect();
        Self {
            tables: RwLock::new(Tables::default()),
            senders,
            journal,
            failing_reads: Mutex::new(HashSet::new()),
            failing_writes: Mutex::new(HashSet::new()),
            delays: Mutex::new(HashMap::new()),
        }
    }

    /// Handle to the op journal, shared with other recording doubles.
    pub fn journal_handle(&self) -> OpJournal {
        Arc::clone(&self.journal)
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Make reads of `table` fail until cleared.
    pub fn fail_reads(&self, table: WatchedTable, failing: bool) {
        let mut set = self
            .failing_reads
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if failing {
            set.insert(table);
        } else {
            set.remove(&table);
        }
    }

    /// Make writes to `table` fail until cleared.
    pub fn fail_writes(&self, table: WatchedTable, failing: bool) {
        let mut set = self
            .failing_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if failing {
            set.insert(table);
        } else {
            set.remove(&table);
        }
    }

    /// Inject latency before the named operation executes.
    pub fn set_delay(&self, op: &'static str, delay: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(op, delay);
    }

    /// Deliver a push event directly, as the realtime channel would.
    pub fn emit(&self, table: WatchedTable, kind: ChangeKind, record: serde_json::Value) {
        if let Some(tx) = self.senders.get(&table) {
            let _ = tx.send(ChangeEvent {
                table,
                kind,
                record,
            });
        }
    }

    pub async fn seed_trading_config(&self, record: TradingConfigRecord) {
        self.tables.write().await.trading_config = Some(record);
    }

    pub async fn seed_progress(&self, record: ProgressRecord) {
        self.tables.write().await.progress = Some(record);
    }

    pub async fn seed_exchange(&self, record: ExchangeConnectionRecord) {
        let mut tables = self.tables.write().await;
        tables.exchanges.retain(|e| e.exchange != record.exchange);
        tables.exchanges.push(record);
    }

    pub async fn seed_fleet(&self, record: FleetRecord) {
        self.tables.write().await.fleet.push(record);
    }

    pub async fn seed_instance(&self, record: InstanceRecord) {
        self.tables.write().await.instances.push(record);
    }

    pub async fn seed_ai_status(&self, record: AiStatusRecord) {
        self.tables.write().await.ai_status = Some(record);
    }

    pub async fn fleet_row(&self, row_id: Uuid) -> Option<FleetRecord> {
        self.tables
            .read()
            .await
            .fleet
            .iter()
            .find(|r| r.row_id == row_id)
            .cloned()
    }

    pub async fn instance_row(&self, row_id: Uuid) -> Option<InstanceRecord> {
        self.tables
            .read()
            .await
            .instances
            .iter()
            .find(|r| r.row_id == row_id)
            .cloned()
    }

    fn record(&self, entry: String) {
        self.journal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    async fn apply_delay(&self, op: &'static str) {
        let delay = self
            .delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(op)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_read(&self, table: WatchedTable) -> Result<()> {
        let failing = self
            .failing_reads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&table);
        if failing {
            Err(PitbossError::Store(format!(
                "injected read failure on {table}"
            )))
        } else {
            Ok(())
        }
    }

    fn check_write(&self, table: WatchedTable) -> Result<()> {
        let failing = self
            .failing_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&table);
        if failing {
            Err(PitbossError::StoreWriteRejected {
                table: table.as_str().to_string(),
                reason: "injected write failure".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn broadcast(&self, table: WatchedTable, kind: ChangeKind, record: serde_json::Value) {
        if let Some(tx) = self.senders.get(&table) {
            let _ = tx.send(ChangeEvent {
                table,
                kind,
                record,
            });
        }
    }
}

impl Default for MemoryControlStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlStore for MemoryControlStore {
    async fn fetch_trading_config(&self) -> Result<Option<TradingConfigRecord>> {
        self.apply_delay("fetch_trading_config").await;
        self.check_read(WatchedTable::TradingConfig)?;
        Ok(self.tables.read().await.trading_config.clone())
    }

    async fn update_trading_config(&self, patch: TradingConfigPatch) -> Result<()> {
        self.apply_delay("update_trading_config").await;
        self.check_write(WatchedTable::TradingConfig)?;

        let mut entry = String::from("store.update_trading_config");
        if let Some(v) = patch.global_kill_switch_enabled {
            entry.push_str(&format!(" kill_switch={v}"));
        }
        if let Some(v) = patch.bot_status {
            entry.push_str(&format!(" bot_status={v}"));
        }
        if let Some(v) = patch.trading_enabled {
            entry.push_str(&format!(" trading_enabled={v}"));
        }
        if let Some(v) = patch.paper_trading_mode {
            entry.push_str(&format!(" paper_trading_mode={v}"));
        }
        self.record(entry);

        let mut tables = self.tables.write().await;
        let record = tables.trading_config.get_or_insert_with(|| {
            TradingConfigRecord {
                bot_status: Default::default(),
                global_kill_switch_enabled: false,
                trading_enabled: false,
                paper_trading_mode: true,
                daily_pnl: Default::default(),
                weekly_pnl: Default::default(),
                updated_at: Utc::now(),
            }
        });
        if let Some(v) = patch.bot_status {
            record.bot_status = v;
        }
        if let Some(v) = patch.global_kill_switch_enabled {
            record.global_kill_switch_enabled = v;
        }
        if let Some(v) = patch.trading_enabled {
            record.trading_enabled = v;
        }
        if let Some(v) = patch.paper_trading_mode {
            record.paper_trading_mode = v;
        }
        record.updated_at = Utc::now();

        let payload = serde_json::to_value(&*record)?;
        drop(tables);
        self.broadcast(WatchedTable::TradingConfig, ChangeKind::Update, payload);
        Ok(())
    }

    async fn fetch_progress(&self) -> Result<Option<ProgressRecord>> {
        self.check_read(WatchedTable::Progress)?;
        Ok(self.tables.read().await.progress.clone())
    }

    async fn fetch_exchange_connections(&self) -> Result<Vec<ExchangeConnectionRecord>> {
        self.apply_delay("fetch_exchange_connections").await;
        self.check_read(WatchedTable::ExchangeConnections)?;
        Ok(self.tables.read().await.exchanges.clone())
    }

    async fn fetch_active_fleet_deployment(&self) -> Result<Option<FleetRecord>> {
        self.check_read(WatchedTable::Fleet)?;
        Ok(self
            .tables
            .read()
            .await
            .fleet
            .iter()
            .find(|r| r.status == DeploymentStatus::Active)
            .cloned())
    }

    async fn fetch_running_instance(&self) -> Result<Option<InstanceRecord>> {
        self.check_read(WatchedTable::Instances)?;
        Ok(self
            .tables
            .read()
            .await
            .instances
            .iter()
            .find(|r| r.status == DeploymentStatus::Running)
            .cloned())
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
        self.check_write(table)?;
        self.record(format!(
            "store.update_registry_status {registry} {row_id} {status}"
        ));

        let mut tables = self.tables.write().await;
        let found = match registry {
            Registry::Fleet => {
                tables.fleet.iter_mut().find(|r| r.row_id == row_id).map(|r| {
                    r.status = status.clone();
                    r.updated_at = Utc::now();
                })
            }
            Registry::Instance => tables
                .instances
                .iter_mut()
                .find(|r| r.row_id == row_id)
                .map(|r| {
                    r.status = status.clone();
                    r.updated_at = Utc::now();
                }),
        };
        found.ok_or_else(|| PitbossError::Store(format!("no {registry} row {row_id}")))
    }

    async fn fetch_notifications(&self, limit: usize) -> Result<Vec<NotificationRecord>> {
        self.check_read(WatchedTable::Notifications)?;
        let tables = self.tables.read().await;
        let mut rows = tables.notifications.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn insert_notification(&self, notification: NewNotification) -> Result<()> {
        self.check_write(WatchedTable::Notifications)?;
        let record = NotificationRecord {
            id: Uuid::new_v4(),
            title: notification.title,
            message: notification.message,
            kind: notification.kind,
            read: false,
            created_at: Utc::now(),
        };
        let payload = serde_json::to_value(&record)?;
        self.tables.write().await.notifications.push(record);
        self.broadcast(WatchedTable::Notifications, ChangeKind::Insert, payload);
        Ok(())
    }

    async fn fetch_ai_status(&self) -> Result<Option<AiStatusRecord>> {
        self.check_read(WatchedTable::AiStatus)?;
        Ok(self.tables.read().await.ai_status.clone())
    }

    fn subscribe(&self, table: WatchedTable) -> broadcast::Receiver<ChangeEvent> {
        self.senders
            .get(&table)
            .map(|tx| tx.subscribe())
            .unwrap_or_else(|| broadcast::channel(1).1)
    }
}
