//! Core data model shared by the store adapters, the SSOT snapshot and the
//! lifecycle controller.

mod bot;
mod deployment;
mod notification;
mod snapshot;

pub use bot::{
    AiStatusRecord, BotStatus, ExchangeBalance, ExchangeConnectionRecord, ProgressRecord,
    TradingConfigPatch, TradingConfigRecord,
};
pub use deployment::{DeploymentStatus, FleetRecord, InstanceRecord, Registry};
pub use notification::{NewNotification, NotificationKind, NotificationRecord};
pub use snapshot::TradingSnapshot;
