#![forbid(unsafe_code)]

// Error types for configuration, transport, and the client population

use thiserror::Error;

/// Configuration errors, surfaced before any client is created
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("MESSAGE_TYPES must contain at least one non-empty message type")]
    NoMessageTypes,

    #[error("MIN_DELAY_MS ({min}) must not exceed MAX_DELAY_MS ({max})")]
    DelayRange { min: u64, max: u64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("Invalid server URL: {0}")]
    ServerUrl(String),
}

/// Errors raised by a transport while opening, using, or closing a connection
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Connection rejected by server: {0}")]
    Rejected(String),

    #[error("Timed out after {0}ms waiting for connection confirmation")]
    Timeout(u64),

    #[error("Connection closed")]
    Closed,
}

/// Errors surfaced by simulated clients and the population controller
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Connection failure: {0}")]
    ConnectionFailure(#[source] TransportError),

    #[error("Population is full ({max} clients)")]
    PopulationFull { max: usize },

    #[error("Send failed: {0}")]
    SendFailure(#[source] TransportError),

    #[error("Controller has already been started")]
    AlreadyStarted,

    #[error("Controller is stopped")]
    Stopped,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type alias for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;
