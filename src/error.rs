//! Error types for sms-relay

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a webhook delivery did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// URL is not one of the known webhook endpoints; never retried
    #[error("invalid destination URL")]
    InvalidDestination,

    /// Connectivity precheck failed; no attempt was made
    #[error("network unavailable")]
    NetworkUnavailable,

    /// Connection, timeout or other transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx response
    #[error("HTTP status {0}")]
    Http(u16),

    #[error("gave up after {attempts} attempts (last: {last})")]
    ExhaustedRetries {
        attempts: u32,
        last: Box<DeliveryError>,
    },
}

impl DeliveryError {
    /// Only transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transport(_) | DeliveryError::Http(_))
    }
}
