use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Bot run state as stored in the remote trading-configuration record.
///
/// Transitions happen only through the lifecycle controller or through a
/// push event reflecting a change made elsewhere (e.g. by the remote
/// trading engine itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Idle,
    Running,
    Stopped,
    /// Unrecognized status strings deserialize to this at the store edge.
    #[serde(other)]
    Error,
}

impl Default for BotStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BotStatus {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            _ => Err("invalid bot status; expected idle|running|stopped|error"),
        }
    }
}

/// Remote trading-configuration row (single-row table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfigRecord {
    pub bot_status: BotStatus,
    pub global_kill_switch_enabled: bool,
    pub trading_enabled: bool,
    pub paper_trading_mode: bool,
    #[serde(default)]
    pub daily_pnl: Decimal,
    #[serde(default)]
    pub weekly_pnl: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Partial update for the trading-configuration row. `None` fields are left
/// untouched by the store adapter.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TradingConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_status: Option<BotStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_kill_switch_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trading_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paper_trading_mode: Option<bool>,
}

impl TradingConfigPatch {
    pub fn bot_status(mut self, status: BotStatus) -> Self {
        self.bot_status = Some(status);
        self
    }

    pub fn kill_switch(mut self, enabled: bool) -> Self {
        self.global_kill_switch_enabled = Some(enabled);
        self
    }

    pub fn trading_enabled(mut self, enabled: bool) -> Self {
        self.trading_enabled = Some(enabled);
        self
    }

    pub fn paper_trading_mode(mut self, enabled: bool) -> Self {
        self.paper_trading_mode = Some(enabled);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bot_status.is_none()
            && self.global_kill_switch_enabled.is_none()
            && self.trading_enabled.is_none()
            && self.paper_trading_mode.is_none()
    }
}

/// Session-progress row: unlock flags gating paper/live trading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(default)]
    pub paper_mode_unlocked: bool,
    #[serde(default)]
    pub live_mode_unlocked: bool,
    #[serde(default)]
    pub successful_paper_trades: u32,
    #[serde(default)]
    pub simulation_completed: bool,
}

/// Per-exchange connection row as stored remotely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConnectionRecord {
    pub exchange: String,
    pub is_connected: bool,
    #[serde(default)]
    pub total_balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Per-exchange balance entry inside the SSOT snapshot. Never created by UI
/// code; only sync passes and push deliveries produce these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeBalance {
    pub is_connected: bool,
    pub total: Decimal,
    pub last_update: DateTime<Utc>,
}

impl From<&ExchangeConnectionRecord> for ExchangeBalance {
    fn from(record: &ExchangeConnectionRecord) -> Self {
        Self {
            is_connected: record.is_connected,
            total: record.total_balance,
            last_update: record.updated_at,
        }
    }
}

/// AI sentiment service status row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiStatusRecord {
    pub status: String,
    pub updated_at: DateTime<Utc>,
}
