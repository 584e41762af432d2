//! Client-side control core for a remotely hosted trading bot: one
//! authoritative trading snapshot synchronized against the remote store,
//! lifecycle control (start/stop/kill switch) over remote function calls,
//! health indicators and a notification feed.

pub mod client;
pub mod config;
pub mod deployment;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod health;
pub mod lifecycle;
pub mod notifications;
pub mod store;
pub mod sync;

pub use client::ControlClient;
pub use config::{AppConfig, ControlConfig, FeedConfig, HealthConfig, StoreConfig, SyncConfig};
pub use deployment::{ActiveDeployment, DeploymentResolver, ResolvedDeployment};
pub use domain::{
    BotStatus, DeploymentStatus, NotificationKind, NotificationRecord, Registry, TradingSnapshot,
};
pub use error::{PitbossError, Result};
pub use gateway::{
    AlertLevel, BotControlAction, FunctionGateway, HttpFunctionGateway, NoopFunctionGateway,
    TelegramAlerter, TradeEngineAction,
};
pub use health::{HealthHandle, HealthIndicator, HealthMonitor, IndicatorColor, IndicatorId};
pub use lifecycle::{BotLifecycleController, LifecycleReport, StartMode, StepReport, StepSeverity};
pub use notifications::{NotificationFeed, NotificationFeedHandle};
pub use store::{
    ChangeEvent, ChangeKind, ControlStore, MemoryControlStore, RealtimeConfig, RealtimeListener,
    RestControlStore, WatchedTable,
};
pub use sync::{FetchedState, StateHandle, StateStore, StateStoreRunner, SyncScope};
