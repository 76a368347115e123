//! Engine error types.

use relaydrive_crypto::CryptoError;
use relaydrive_protocol::Direction;
use relaydrive_remote::TransportError;
use relaydrive_transfer::TransferError;

use crate::metadata::MetadataError;

/// Errors produced by uploads, downloads and deletions.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A shard failed AEAD verification. Never retried.
    #[error("shard {sequence} failed authentication: corrupted data or wrong password")]
    AuthenticationFailure { sequence: u32 },

    #[error("shard {sequence} failed after {attempts} attempts: {last_error}")]
    ShardTransferFailed {
        sequence: u32,
        attempts: u32,
        last_error: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("file is encrypted but the session has no key")]
    KeyRequired,

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("another {0:?} is already running")]
    Busy(Direction),

    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("transfer error: {0}")]
    Transfer(TransferError),

    #[error("worker failed: {0}")]
    Worker(String),
}

impl EngineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<TransferError> for EngineError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::InvalidInput(msg) => Self::InvalidInput(msg),
            other => Self::Transfer(other),
        }
    }
}

impl From<TransportError> for EngineError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Cancelled => Self::Cancelled,
            TransportError::ShardTransferFailed {
                sequence,
                attempts,
                last_error,
            } => Self::ShardTransferFailed {
                sequence,
                attempts,
                last_error,
            },
            TransportError::Prepare { sequence, reason } => {
                Self::InvalidInput(format!("shard {sequence}: {reason}"))
            }
        }
    }
}
