use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_SHARD_SIZE;

/// Reference to one uploaded shard in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardHandle {
    /// Position of the shard within its file (0-based).
    pub sequence: u32,
    /// Remote message carrying the shard; needed for deletion.
    pub message_id: i64,
    /// Remote object identifier; needed for download.
    pub remote_id: String,
}

/// Metadata for one logical file stored as N shards.
///
/// A record is only ever built once every shard has been accepted by the
/// remote store, so `parts` is always complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_type: String,
    pub encrypted: bool,
    #[serde(default = "default_shard_size")]
    pub shard_size: u64,
    pub parts: Vec<ShardHandle>,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

fn default_shard_size() -> u64 {
    DEFAULT_SHARD_SIZE
}

/// Structural problems found in a [`FileRecord`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record has no parts")]
    NoParts,

    #[error("record has zero shard size")]
    ZeroShardSize,

    #[error("expected {expected} parts for {file_size} bytes, found {found}")]
    PartCount {
        expected: u64,
        found: usize,
        file_size: u64,
    },

    #[error("part at position {position} has sequence {sequence}")]
    OutOfOrder { position: usize, sequence: u32 },
}

impl FileRecord {
    /// Number of shards a file of `file_size` bytes occupies (minimum 1).
    pub fn expected_parts(file_size: u64, shard_size: u64) -> u64 {
        if shard_size == 0 {
            return 0;
        }
        file_size.div_ceil(shard_size).max(1)
    }

    /// Checks that `parts` is complete and ordered `0..N-1`.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.shard_size == 0 {
            return Err(RecordError::ZeroShardSize);
        }
        if self.parts.is_empty() {
            return Err(RecordError::NoParts);
        }
        let expected = Self::expected_parts(self.file_size, self.shard_size);
        if self.parts.len() as u64 != expected {
            return Err(RecordError::PartCount {
                expected,
                found: self.parts.len(),
                file_size: self.file_size,
            });
        }
        for (position, part) in self.parts.iter().enumerate() {
            if part.sequence as usize != position {
                return Err(RecordError::OutOfOrder {
                    position,
                    sequence: part.sequence,
                });
            }
        }
        Ok(())
    }

    /// Plaintext length of the shard at `sequence`.
    pub fn shard_len(&self, sequence: u32) -> u64 {
        let offset = sequence as u64 * self.shard_size;
        self.file_size.saturating_sub(offset).min(self.shard_size)
    }
}

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

/// Lifecycle state of one file transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl TransferStatus {
    /// Returns `true` once no further state change is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot handed to progress callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub status: TransferStatus,
    pub percent: f64,
    pub bytes_per_second: f64,
    /// `None` while throughput is unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    pub status_label: String,
    pub transferred_bytes: u64,
    pub total_bytes: u64,
    /// 1-based position of the file within its upload batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_total: Option<u32>,
    /// 0-based shard currently being transferred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_index: Option<u32>,
}

impl TransferProgress {
    /// A zeroed snapshot carrying only a status and label.
    pub fn with_status(status: TransferStatus, label: impl Into<String>) -> Self {
        Self {
            status,
            percent: 0.0,
            bytes_per_second: 0.0,
            eta_seconds: None,
            status_label: label.into(),
            transferred_bytes: 0,
            total_bytes: 0,
            file_number: None,
            batch_total: None,
            shard_index: None,
        }
    }
}
