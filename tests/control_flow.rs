//! End-to-end flows over the in-memory store: lifecycle ordering, failure
//! degradation, kill-switch validation and sync staleness.

mod common;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use common::RecordingGateway;
use pitboss::config::{ControlConfig, SyncConfig};
use pitboss::domain::{
    BotStatus, DeploymentStatus, ExchangeConnectionRecord, FleetRecord, TradingConfigRecord,
};
use pitboss::gateway::{FunctionGateway, TelegramAlerter};
use pitboss::lifecycle::BotLifecycleController;
use pitboss::store::{ControlStore, MemoryControlStore, WatchedTable};
use pitboss::sync::{FetchedState, StateStore, StateStoreRunner, SyncScope};
use pitboss::{PitbossError, StartMode, StateHandle};

struct Harness {
    store: Arc<MemoryControlStore>,
    gateway: Arc<RecordingGateway>,
    controller: BotLifecycleController,
    state: StateHandle,
    _runner: StateStoreRunner,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryControlStore::new());
    let gateway = Arc::new(RecordingGateway::new(store.journal_handle()));
    let sync_config = SyncConfig {
        poll_interval_secs: 3600,
        channel_capacity: 16,
    };
    let (state, runner) = StateStore::spawn(store.clone(), &sync_config);
    let dyn_gateway: Arc<dyn FunctionGateway> = gateway.clone();
    let controller = BotLifecycleController::new(
        store.clone(),
        Arc::clone(&dyn_gateway),
        state.clone(),
        TelegramAlerter::new(dyn_gateway, true),
        &ControlConfig::default(),
    );
    Harness {
        store,
        gateway,
        controller,
        state,
        _runner: runner,
    }
}

fn active_fleet() -> FleetRecord {
    FleetRecord {
        row_id: Uuid::new_v4(),
        deployment_id: Some("dep-1".into()),
        droplet_id: None,
        provider: Some("vultr".into()),
        ip_address: Some("203.0.113.7".into()),
        status: DeploymentStatus::Active,
        updated_at: Utc::now(),
    }
}

fn position(journal: &[String], needle: &str) -> Option<usize> {
    journal.iter().position(|e| e.contains(needle))
}

#[tokio::test]
async fn kill_switch_clear_completes_before_the_start_signal() {
    let h = harness();
    h.store.seed_fleet(active_fleet()).await;
    // Latency on the store write must not let the start signal overtake
    // it, and a slow signal must still complete before the status write.
    h.store
        .set_delay("update_trading_config", Duration::from_millis(40));
    h.gateway.set_delay("bot-control", Duration::from_millis(25));

    h.controller
        .start(StartMode::Paper)
        .await
        .expect("paper start");

    let journal = h.store.journal();
    let clear = position(&journal, "kill_switch=false").expect("kill switch cleared");
    let signal = position(&journal, "gateway.bot_control start").expect("start signalled");
    let mark = position(&journal, "bot_status=running").expect("marked running");
    assert!(clear < signal, "journal: {journal:?}");
    assert!(signal < mark, "journal: {journal:?}");
}

#[tokio::test]
async fn failed_kill_switch_write_aborts_the_start_with_no_signal() {
    let h = harness();
    h.store.seed_fleet(active_fleet()).await;
    h.store
        .seed_trading_config(TradingConfigRecord {
            bot_status: BotStatus::Idle,
            global_kill_switch_enabled: true,
            trading_enabled: false,
            paper_trading_mode: true,
            daily_pnl: Decimal::ZERO,
            weekly_pnl: Decimal::ZERO,
            updated_at: Utc::now(),
        })
        .await;
    h.store.fail_writes(WatchedTable::TradingConfig, true);

    let err = h
        .controller
        .start(StartMode::Paper)
        .await
        .expect_err("start must fail");
    assert!(matches!(err, PitbossError::StoreWriteRejected { .. }));

    // Remote status unchanged, nothing signalled.
    let config = h
        .store
        .fetch_trading_config()
        .await
        .expect("fetch")
        .expect("row exists");
    assert_eq!(config.bot_status, BotStatus::Idle);
    assert!(config.global_kill_switch_enabled);
    assert!(position(&h.store.journal(), "gateway.bot_control").is_none());
}

#[tokio::test]
async fn unreachable_vps_degrades_to_a_local_start() {
    let h = harness();
    h.store.seed_fleet(active_fleet()).await;
    h.gateway.fail("bot-control", true);

    let report = h
        .controller
        .start(StartMode::Paper)
        .await
        .expect("start should still succeed locally");
    assert!(!report.fully_succeeded());
    let warnings = report.warnings();
    assert!(warnings.iter().any(|s| s.name == "signal_start"));

    assert_eq!(h.state.bot_status(), BotStatus::Running);
    let config = h
        .store
        .fetch_trading_config()
        .await
        .expect("fetch")
        .expect("row exists");
    assert_eq!(config.bot_status, BotStatus::Running);
    assert!(config.trading_enabled);
    // Registry status is still best-effort updated.
    assert!(position(&h.store.journal(), "update_registry_status fleet").is_some());
}

#[tokio::test]
async fn kill_codes_are_validated_before_any_remote_call() {
    let h = harness();
    h.store.seed_fleet(active_fleet()).await;

    for bad in ["12345", "abcdef"] {
        let err = h
            .controller
            .activate_kill_switch(bad)
            .await
            .expect_err("bad code must be rejected");
        assert!(matches!(err, PitbossError::Validation(_)));
    }
    assert!(h.store.journal().is_empty(), "zero remote calls for bad codes");

    let report = h
        .controller
        .activate_kill_switch("000000")
        .await
        .expect("valid code");
    assert!(report.fully_succeeded(), "report: {report:?}");

    let journal = h.store.journal();
    let flag_writes = journal
        .iter()
        .filter(|e| e.contains("kill_switch=true"))
        .count();
    assert_eq!(flag_writes, 1, "exactly one flag write: {journal:?}");
    // The full halt sequence ran.
    for needle in [
        "gateway.trade_engine close-all-positions",
        "gateway.trade_engine cancel-open-orders",
        "gateway.trade_engine stop-copier",
        "gateway.bot_control stop",
        "gateway.send_telegram",
    ] {
        assert!(position(&journal, needle).is_some(), "missing {needle}: {journal:?}");
    }
}

#[tokio::test]
async fn failed_kill_switch_engage_still_halts_but_reports_the_error() {
    let h = harness();
    h.store.seed_fleet(active_fleet()).await;
    h.store.fail_writes(WatchedTable::TradingConfig, true);

    let err = h
        .controller
        .activate_kill_switch("000000")
        .await
        .expect_err("failed flag write must surface");
    assert!(matches!(err, PitbossError::StoreWriteRejected { .. }));

    // The snapshot must not claim stopped while the flag never engaged.
    assert_eq!(h.state.bot_status(), BotStatus::Idle);

    let journal = h.store.journal();
    assert!(position(&journal, "kill_switch=true").is_none());
    // The halt sequence was still attempted in full.
    for needle in [
        "gateway.trade_engine close-all-positions",
        "gateway.trade_engine cancel-open-orders",
        "gateway.trade_engine stop-copier",
        "gateway.bot_control stop",
        "gateway.send_telegram",
    ] {
        assert!(position(&journal, needle).is_some(), "missing {needle}: {journal:?}");
    }
}

#[tokio::test]
async fn interleaved_syncs_never_regress_the_snapshot() {
    let h = harness();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let base = Utc::now();
    let mut stamps = Vec::new();
    // Completion order deliberately differs from start order.
    for offset in [5i64, 2, 9, 1, 7] {
        let ts = base + chrono::Duration::seconds(offset);
        stamps.push(ts);
        let mut fetched = FetchedState::empty(ts);
        fetched.config = Some(TradingConfigRecord {
            bot_status: BotStatus::Running,
            global_kill_switch_enabled: false,
            trading_enabled: true,
            paper_trading_mode: true,
            daily_pnl: Decimal::from(offset),
            weekly_pnl: Decimal::ZERO,
            updated_at: ts,
        });
        h.state.apply_fetched(fetched);
    }

    let snap = h.state.snapshot();
    let max = stamps.iter().max().copied().expect("stamps");
    assert_eq!(snap.last_update, max);
    // The freshest pass' data won, not the last-applied one.
    assert_eq!(snap.daily_pnl, dec!(9));
    assert!(h.state.stale_drop_count() >= 2);
}

#[tokio::test]
async fn balance_changes_flow_into_derived_equity() {
    let h = harness();
    h.store
        .seed_exchange(ExchangeConnectionRecord {
            exchange: "binance".into(),
            is_connected: true,
            total_balance: dec!(1200),
            updated_at: Utc::now(),
        })
        .await;
    h.store
        .seed_exchange(ExchangeConnectionRecord {
            exchange: "kraken".into(),
            is_connected: false,
            total_balance: dec!(9000),
            updated_at: Utc::now(),
        })
        .await;

    h.state
        .request_sync(SyncScope::Balances)
        .await
        .expect("store running");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.state.total_equity(), dec!(1200));
    assert_eq!(h.state.connected_exchange_count(), 1);
}

#[tokio::test]
async fn resolver_is_idempotent_across_lifecycle_reads() {
    let h = harness();
    h.store.seed_fleet(active_fleet()).await;

    let resolver = pitboss::DeploymentResolver::new(h.store.clone() as Arc<dyn ControlStore>);
    let first = resolver.resolve_active().await.expect("resolve");
    let second = resolver.resolve_active().await.expect("resolve");
    assert_eq!(first, second);
    assert!(h.store.journal().is_empty(), "resolution must not write");
}
