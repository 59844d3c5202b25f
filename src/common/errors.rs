//! Error types for the application

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our AlphaError
pub type Result<T> = std::result::Result<T, AlphaError>;

/// Main error type for collectors, store, and executors
#[derive(Error, Debug)]
pub enum AlphaError {
    /// Feed disconnects, fetch timeouts and similar retryable failures
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// WebSocket connection errors
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    /// WebSocket send/receive errors
    #[error("WebSocket communication error: {0}")]
    WebSocketCommunication(String),

    /// HTTP request errors
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Unparseable feed payload
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Exchange-side rate limiting
    #[error("Rate limit exceeded: {message}, retry after {retry_after_seconds:?} seconds")]
    RateLimit {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    /// Invalid API response
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Document store write failed
    #[error("Store write failed: {0}")]
    StoreWrite(String),

    /// Database driver errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Order gateway errors; `recoverable` means the outcome is unknown and
    /// must be reconciled with an order-status query
    #[error("Gateway error (recoverable: {recoverable}): {message}")]
    Gateway { message: String, recoverable: bool },

    /// An order stayed open past the configured timeout
    #[error("Order timed out: {0}")]
    OrderTimeout(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Channel send errors
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AlphaError {
    /// Errors that are retried with backoff and never surfaced as fatal
    pub fn is_transient(&self) -> bool {
        match self {
            AlphaError::TransientNetwork(_)
            | AlphaError::WebSocketConnection(_)
            | AlphaError::WebSocketCommunication(_)
            | AlphaError::RateLimit { .. } => true,
            AlphaError::HttpRequest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// True for exchange-side throttling
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, AlphaError::RateLimit { .. })
    }

    /// Server-provided wait hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AlphaError::RateLimit {
                retry_after_seconds: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    pub fn gateway(message: impl Into<String>, recoverable: bool) -> Self {
        AlphaError::Gateway {
            message: message.into(),
            recoverable,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AlphaError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AlphaError::WebSocketCommunication(err.to_string())
    }
}
