use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Failed to connect: {0}")]
    ConnectError(String),

    #[error("Failed to decode inbound message: {0}")]
    DecodeError(String),

    #[error("Failed to generate text: {0}")]
    GenerationError(String),

    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("Cache operation failed: {0}")]
    CacheError(String),

    #[error("Failed to deliver message: {0}")]
    DeliveryError(String),

    #[error("Queue operation failed: {0}")]
    QueueError(String),

    #[error("Failed to send HTTP request: {0}")]
    HttpError(String),
}

impl EnrichError {
    /// Process exit code for errors that end the worker.
    ///
    /// Configuration and connection failures map to the `sysexits.h` codes so an
    /// orchestrator can tell a bad deployment apart from a crash.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            EnrichError::ConfigError(_) => 78,
            EnrichError::ConnectError(_) => 69,
            _ => 1,
        }
    }
}

impl From<reqwest::Error> for EnrichError {
    fn from(error: reqwest::Error) -> Self {
        EnrichError::HttpError(error.to_string())
    }
}

impl From<redis::RedisError> for EnrichError {
    fn from(error: redis::RedisError) -> Self {
        EnrichError::CacheError(error.to_string())
    }
}

impl From<serde_json::Error> for EnrichError {
    fn from(error: serde_json::Error) -> Self {
        EnrichError::DecodeError(error.to_string())
    }
}
