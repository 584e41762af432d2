//! Top-level assembly: wires the store, gateway, sync store, health
//! monitor, notification feed and lifecycle controller from one
//! [`AppConfig`]. This is the object an embedding UI holds for the lifetime
//! of a session; dropping it tears every background task down.

use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::error::Result;
use crate::gateway::{FunctionGateway, HttpFunctionGateway, NoopFunctionGateway, TelegramAlerter};
use crate::health::{HealthHandle, HealthMonitor, HealthRunner};
use crate::lifecycle::BotLifecycleController;
use crate::notifications::{NotificationFeed, NotificationFeedHandle, NotificationFeedRunner};
use crate::store::{
    ControlStore, MemoryControlStore, RealtimeConfig, RealtimeListener, RestControlStore,
};
use crate::sync::{StateHandle, StateStore, StateStoreRunner};

/// Everything a control-panel session needs, built once from config.
///
/// With no store URL configured the client runs local-only: in-memory
/// store, no-op gateway, no realtime socket. Must be constructed inside a
/// tokio runtime.
pub struct ControlClient {
    state: StateHandle,
    health: HealthHandle,
    feed: NotificationFeedHandle,
    controller: BotLifecycleController,
    _state_runner: StateStoreRunner,
    _health_runner: HealthRunner,
    _feed_runner: NotificationFeedRunner,
    _realtime: Option<RealtimeListener>,
}

impl ControlClient {
    pub fn connect(config: &AppConfig) -> Result<Self> {
        let (store, realtime): (Arc<dyn ControlStore>, Option<RealtimeListener>) =
            if config.store.base_url.is_empty() {
                info!("no store configured, running local-only");
                (Arc::new(MemoryControlStore::new()), None)
            } else {
                let rest = RestControlStore::new(&config.store)?;
                let listener = RealtimeConfig::from_store(&config.store)
                    .map(|realtime_config| {
                        RealtimeListener::spawn(realtime_config, rest.change_senders())
                    });
                if listener.is_none() {
                    info!("no realtime endpoint configured, poll-only sync");
                }
                (Arc::new(rest), listener)
            };

        let gateway: Arc<dyn FunctionGateway> = if config.functions.base_url.is_empty() {
            Arc::new(NoopFunctionGateway)
        } else {
            Arc::new(HttpFunctionGateway::new(&config.functions)?)
        };
        let alerter =
            TelegramAlerter::new(Arc::clone(&gateway), config.alerts.telegram_enabled);

        let (state, state_runner) = StateStore::spawn(Arc::clone(&store), &config.sync);
        let (health, health_runner) =
            HealthMonitor::spawn(Arc::clone(&store), Arc::clone(&gateway), &config.health);
        let (feed, feed_runner) = NotificationFeed::spawn(Arc::clone(&store), &config.feed);
        let controller =
            BotLifecycleController::new(store, gateway, state.clone(), alerter, &config.control);

        Ok(Self {
            state,
            health,
            feed,
            controller,
            _state_runner: state_runner,
            _health_runner: health_runner,
            _feed_runner: feed_runner,
            _realtime: realtime,
        })
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn health(&self) -> &HealthHandle {
        &self.health
    }

    pub fn feed(&self) -> &NotificationFeedHandle {
        &self.feed
    }

    pub fn lifecycle(&self) -> &BotLifecycleController {
        &self.controller
    }

    /// Explicit teardown; equivalent to dropping the client.
    pub fn shutdown(self) {
        info!("control client shutting down");
    }
}
