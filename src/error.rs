use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the control core
#[derive(Error, Debug)]
pub enum PitbossError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Remote store errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Store write rejected: {table}: {reason}")]
    StoreWriteRejected { table: String, reason: String },

    // Remote function errors
    #[error("Gateway error: {function}: {reason}")]
    Gateway { function: String, reason: String },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Live trading requires an explicit confirmation carrying the equity
    /// figure shown to the user.
    #[error("Live trading start requires confirmation (total equity ${total_equity})")]
    ConfirmationRequired { total_equity: Decimal },

    // Channel/lifecycle errors
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for PitbossError
pub type Result<T> = std::result::Result<T, PitbossError>;
