use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::bot::{BotStatus, ExchangeBalance};

/// The single authoritative in-memory view all UI reads derive from.
///
/// Created once per session, mutated only through the state store's
/// reconciliation loop and the two explicit local-apply paths, discarded on
/// teardown. `last_update` is monotonically non-decreasing: any fetch whose
/// source timestamp is older than the held value is dropped, so a slow
/// stale poll can never overwrite a fresher push-triggered refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSnapshot {
    pub bot_status: BotStatus,
    pub paper_trading_mode: bool,
    pub exchange_balances: HashMap<String, ExchangeBalance>,
    pub daily_pnl: Decimal,
    pub weekly_pnl: Decimal,
    pub paper_mode_unlocked: bool,
    pub live_mode_unlocked: bool,
    pub successful_paper_trades: u32,
    pub simulation_completed: bool,
    pub last_update: DateTime<Utc>,
}

impl TradingSnapshot {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            bot_status: BotStatus::Idle,
            paper_trading_mode: true,
            exchange_balances: HashMap::new(),
            daily_pnl: Decimal::ZERO,
            weekly_pnl: Decimal::ZERO,
            paper_mode_unlocked: false,
            live_mode_unlocked: false,
            successful_paper_trades: 0,
            simulation_completed: false,
            last_update: now,
        }
    }

    /// Sum of balances across connected exchanges. Zero on an empty map.
    pub fn total_equity(&self) -> Decimal {
        self.exchange_balances
            .values()
            .filter(|b| b.is_connected)
            .map(|b| b.total)
            .sum()
    }

    /// Number of exchanges currently reporting a live connection.
    pub fn connected_exchange_count(&self) -> usize {
        self.exchange_balances
            .values()
            .filter(|b| b.is_connected)
            .count()
    }
}

impl Default for TradingSnapshot {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}
