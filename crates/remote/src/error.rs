//! Error types for remote store access.

use std::time::Duration;

/// A single failed call against the remote store.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited: retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {description}")]
    Api { status: u16, description: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RemoteError {
    /// Server-specified wait for rate-limit responses.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Configuration mistakes will not fix themselves on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

/// Terminal outcome of a retried shard operation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cancelled")]
    Cancelled,

    #[error("shard {sequence} failed after {attempts} attempts: {last_error}")]
    ShardTransferFailed {
        sequence: u32,
        attempts: u32,
        last_error: String,
    },

    /// Preparing the shard body failed; not retried.
    #[error("failed to prepare shard {sequence}: {reason}")]
    Prepare { sequence: u32, reason: String },
}
