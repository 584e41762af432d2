use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub functions: FunctionsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from a config file with `PITBOSS_`-prefixed environment
    /// overrides layered on top (e.g. `PITBOSS_STORE__API_KEY`).
    pub fn load(path: &Path) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("PITBOSS").separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

/// Remote structured store endpoints. When `base_url` is empty the client
/// runs in local-only mode against the in-memory store.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// WebSocket endpoint for the push change feed; omitted means polling only.
    #[serde(default)]
    pub realtime_url: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            realtime_url: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Remote function endpoints (bot-control, trade-engine, telegram, health).
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionsConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// SSOT store reconciliation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Full-sync poll interval; pushes race this freely, staleness
    /// rejection keeps the snapshot coherent.
    #[serde(default = "default_sync_poll_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_sync_poll_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_poll_secs")]
    pub poll_interval_secs: u64,
    /// Whether to issue active `check-vps-health` probes on top of the
    /// status rows.
    #[serde(default = "default_true")]
    pub probe_vps: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_health_poll_secs(),
            probe_vps: default_true(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_backfill")]
    pub backfill_limit: usize,
    #[serde(default = "default_feed_capacity")]
    pub capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            backfill_limit: default_feed_backfill(),
            capacity: default_feed_capacity(),
        }
    }
}

/// Lifecycle-controller knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Required length of the kill-switch confirmation code.
    #[serde(default = "default_kill_code_length")]
    pub kill_code_length: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            kill_code_length: default_kill_code_length(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_true")]
    pub telegram_enabled: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            telegram_enabled: default_true(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// EnvFilter directive, e.g. "info,pitboss=debug".
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// Initialize tracing. Safe to call more than once; later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter.clone()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_sync_poll_secs() -> u64 {
    15
}

fn default_channel_capacity() -> usize {
    64
}

fn default_health_poll_secs() -> u64 {
    10
}

fn default_feed_backfill() -> usize {
    50
}

fn default_feed_capacity() -> usize {
    200
}

fn default_kill_code_length() -> usize {
    6
}

fn default_true() -> bool {
    true
}

fn default_log_filter() -> String {
    "info".to_string()
}
