//! State synchronization store — the SSOT.
//!
//! One owner task runs a reconciliation loop fed by a single mpsc queue;
//! everything that can change the snapshot (user-triggered refresh, poll
//! tick, push-delivered table changes) is funneled through that queue, so
//! "notification arrived" is decoupled from "snapshot updated" and the
//! staleness rule is enforced in exactly one place.
//!
//! Staleness rule: every sync pass stamps its fetch-start time; a pass is
//! applied only if that stamp is newer than the snapshot's `last_update`.
//! Last-writer-wins by source timestamp, not completion order, so a slow
//! stale poll can never overwrite a fresher push-triggered refresh, and a
//! response landing after teardown has no loop left to apply it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::domain::{
    BotStatus, ExchangeBalance, ExchangeConnectionRecord, ProgressRecord, TradingConfigRecord,
    TradingSnapshot,
};
use crate::error::{PitbossError, Result};
use crate::store::{ControlStore, WatchedTable};

/// Which slice of the snapshot a sync pass refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    Full,
    TradingConfig,
    Balances,
    Progress,
}

#[derive(Debug, Clone, Copy)]
struct SyncRequest {
    scope: SyncScope,
    requested_at: DateTime<Utc>,
}

/// Result of one fetch pass, stamped with the pass' fetch-start time.
#[derive(Debug, Clone)]
pub struct FetchedState {
    pub source_ts: DateTime<Utc>,
    pub config: Option<TradingConfigRecord>,
    pub progress: Option<ProgressRecord>,
    pub balances: Option<Vec<ExchangeConnectionRecord>>,
}

impl FetchedState {
    pub fn empty(source_ts: DateTime<Utc>) -> Self {
        Self {
            source_ts,
            config: None,
            progress: None,
            balances: None,
        }
    }
}

/// Cloneable read/control surface over the snapshot. Derived getters are
/// synchronous, O(number of exchanges) and never panic.
#[derive(Clone)]
pub struct StateHandle {
    snapshot: Arc<RwLock<TradingSnapshot>>,
    sync_tx: mpsc::Sender<SyncRequest>,
    stale_drops: Arc<AtomicU64>,
}

impl StateHandle {
    fn read(&self) -> RwLockReadGuard<'_, TradingSnapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TradingSnapshot> {
        self.snapshot.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Clone of the current snapshot.
    pub fn snapshot(&self) -> TradingSnapshot {
        self.read().clone()
    }

    pub fn bot_status(&self) -> BotStatus {
        self.read().bot_status
    }

    pub fn paper_trading_mode(&self) -> bool {
        self.read().paper_trading_mode
    }

    pub fn total_equity(&self) -> Decimal {
        self.read().total_equity()
    }

    pub fn connected_exchange_count(&self) -> usize {
        self.read().connected_exchange_count()
    }

    /// Number of sync passes dropped by the staleness rule.
    pub fn stale_drop_count(&self) -> u64 {
        self.stale_drops.load(Ordering::Relaxed)
    }

    /// Enqueue a sync pass. Returns an error only if the store was torn down.
    pub async fn request_sync(&self, scope: SyncScope) -> Result<()> {
        self.sync_tx
            .send(SyncRequest {
                scope,
                requested_at: Utc::now(),
            })
            .await
            .map_err(|_| PitbossError::ChannelClosed("state store is shut down".into()))
    }

    /// Flip the local paper-trading flag. Changes only which confirmation
    /// path `start()` takes; nothing is started or stopped, and no remote
    /// write happens. Returns the new value.
    pub fn toggle_paper_mode(&self) -> bool {
        let mut snap = self.write();
        snap.paper_trading_mode = !snap.paper_trading_mode;
        let now = Utc::now();
        if now > snap.last_update {
            snap.last_update = now;
        }
        snap.paper_trading_mode
    }

    /// Optimistic local apply from the lifecycle controller, so the UI
    /// reflects user intent without waiting for the push round-trip. The
    /// next real sync pass supersedes it.
    pub fn apply_bot_status(&self, status: BotStatus) {
        let mut snap = self.write();
        snap.bot_status = status;
        let now = Utc::now();
        if now > snap.last_update {
            snap.last_update = now;
        }
    }

    /// The reconciliation step: apply a fetched pass iff its source stamp
    /// is newer than the snapshot. Returns whether it was applied.
    pub fn apply_fetched(&self, fetched: FetchedState) -> bool {
        let mut snap = self.write();
        if fetched.source_ts <= snap.last_update {
            self.stale_drops.fetch_add(1, Ordering::Relaxed);
            debug!(
                source_ts = %fetched.source_ts,
                held = %snap.last_update,
                "dropping stale sync pass"
            );
            return false;
        }

        if let Some(config) = fetched.config {
            snap.bot_status = config.bot_status;
            snap.paper_trading_mode = config.paper_trading_mode;
            snap.daily_pnl = config.daily_pnl;
            snap.weekly_pnl = config.weekly_pnl;
        }
        if let Some(progress) = fetched.progress {
            snap.paper_mode_unlocked = progress.paper_mode_unlocked;
            snap.live_mode_unlocked = progress.live_mode_unlocked;
            snap.successful_paper_trades = progress.successful_paper_trades;
            snap.simulation_completed = progress.simulation_completed;
        }
        if let Some(balances) = fetched.balances {
            snap.exchange_balances = balances
                .iter()
                .map(|r| (r.exchange.clone(), ExchangeBalance::from(r)))
                .collect();
        }
        snap.last_update = fetched.source_ts;
        true
    }
}

/// Guard over the spawned tasks. Dropping it (or calling `shutdown`) aborts
/// the reconciliation loop, the poll tick and every push-subscription
/// forwarder, so nothing leaks across navigation.
pub struct StateStoreRunner {
    tasks: Vec<JoinHandle<()>>,
}

impl StateStoreRunner {
    pub fn shutdown(mut self) {
        self.abort_all();
    }

    fn abort_all(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for StateStoreRunner {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Owner of the reconciliation loop.
pub struct StateStore;

impl StateStore {
    /// Spawn the store: reconciliation loop, poll tick, and one forwarder
    /// per watched table. An initial full sync is queued immediately.
    pub fn spawn(
        store: Arc<dyn ControlStore>,
        config: &SyncConfig,
    ) -> (StateHandle, StateStoreRunner) {
        let (sync_tx, sync_rx) = mpsc::channel(config.channel_capacity.max(1));
        let handle = StateHandle {
            snapshot: Arc::new(RwLock::new(TradingSnapshot::new(
                // Start one tick in the past so the initial sync pass is
                // never rejected as stale.
                Utc::now() - chrono::Duration::milliseconds(1),
            ))),
            sync_tx,
            stale_drops: Arc::new(AtomicU64::new(0)),
        };

        let mut tasks = Vec::new();

        // Push-subscription forwarders: each table change re-enqueues the
        // matching partial scope.
        for (table, scope) in [
            (WatchedTable::TradingConfig, SyncScope::TradingConfig),
            (WatchedTable::ExchangeConnections, SyncScope::Balances),
            (WatchedTable::Progress, SyncScope::Progress),
        ] {
            let rx = store.subscribe(table);
            let tx = handle.sync_tx.clone();
            tasks.push(tokio::spawn(forward_changes(table, scope, rx, tx)));
        }

        let loop_task = tokio::spawn(reconcile_loop(
            Arc::clone(&store),
            handle.clone(),
            sync_rx,
            config.poll_interval_secs,
        ));
        tasks.push(loop_task);

        // Initial full sync.
        let tx = handle.sync_tx.clone();
        tasks.push(tokio::spawn(async move {
            let _ = tx
                .send(SyncRequest {
                    scope: SyncScope::Full,
                    requested_at: Utc::now(),
                })
                .await;
        }));

        (handle, StateStoreRunner { tasks })
    }
}

async fn forward_changes(
    table: WatchedTable,
    scope: SyncScope,
    mut rx: broadcast::Receiver<crate::store::ChangeEvent>,
    tx: mpsc::Sender<SyncRequest>,
) {
    loop {
        let scope = match rx.recv().await {
            Ok(_event) => scope,
            // Missed events: we do not know what changed, resync everything.
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(%table, missed, "push channel lagged, forcing full sync");
                SyncScope::Full
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(%table, "push channel closed, forwarder exiting");
                return;
            }
        };
        if tx
            .send(SyncRequest {
                scope,
                requested_at: Utc::now(),
            })
            .await
            .is_err()
        {
            return;
        }
    }
}

async fn reconcile_loop(
    store: Arc<dyn ControlStore>,
    handle: StateHandle,
    mut sync_rx: mpsc::Receiver<SyncRequest>,
    poll_interval_secs: u64,
) {
    let mut poll_tick =
        tokio::time::interval(std::time::Duration::from_secs(poll_interval_secs.max(1)));
    poll_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // interval fires immediately; the initial sync is queued explicitly.
    poll_tick.tick().await;

    info!(poll_interval_secs, "state store reconciliation loop started");
    loop {
        let request = tokio::select! {
            maybe = sync_rx.recv() => match maybe {
                Some(request) => request,
                None => break,
            },
            _ = poll_tick.tick() => SyncRequest {
                scope: SyncScope::Full,
                requested_at: Utc::now(),
            },
        };
        run_pass(store.as_ref(), &handle, request).await;
    }
    info!("state store reconciliation loop exited");
}

async fn run_pass(store: &dyn ControlStore, handle: &StateHandle, request: SyncRequest) {
    // The staleness stamp is the fetch-start time: a pass that started
    // earlier must never overwrite one that started later, no matter which
    // finishes first.
    let mut fetched = FetchedState::empty(Utc::now());
    debug!(scope = ?request.scope, requested_at = %request.requested_at, "sync pass starting");

    let want_config = matches!(request.scope, SyncScope::Full | SyncScope::TradingConfig);
    let want_balances = matches!(request.scope, SyncScope::Full | SyncScope::Balances);
    let want_progress = matches!(request.scope, SyncScope::Full | SyncScope::Progress);

    if want_config {
        match store.fetch_trading_config().await {
            Ok(config) => fetched.config = config,
            Err(e) => warn!(error = %e, "trading config fetch failed, keeping last known"),
        }
    }
    if want_balances {
        match store.fetch_exchange_connections().await {
            Ok(rows) => fetched.balances = Some(rows),
            Err(e) => warn!(error = %e, "exchange connections fetch failed, keeping last known"),
        }
    }
    if want_progress {
        match store.fetch_progress().await {
            Ok(progress) => fetched.progress = progress,
            Err(e) => warn!(error = %e, "progress fetch failed, keeping last known"),
        }
    }

    handle.apply_fetched(fetched);
}
