use std::sync::Arc;

use relaydrive_protocol::{Direction, TransferProgress};
use serde::Serialize;

/// Receives progress snapshots; called at least once per completed shard.
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Asked before buffering a large download in memory. Receives the file
/// size; `false` cancels the download.
pub type ConfirmCallback = Arc<dyn Fn(u64) -> bool + Send + Sync>;

/// Caller-supplied metadata for a new upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadMeta {
    pub file_name: String,
    /// MIME type, informational only.
    pub file_type: String,
    pub parent_id: Option<String>,
}

impl UploadMeta {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = file_type.into();
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Outcome of deleting a file's shards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub deleted: u32,
    pub failed: u32,
}

/// Events emitted by the [`TransferSupervisor`](crate::TransferSupervisor).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransferEvent {
    /// Batch uploads carry the file position in `progress.file_number`.
    Progress {
        direction: Direction,
        progress: TransferProgress,
    },
    Completed {
        direction: Direction,
        file_name: String,
        file_id: String,
    },
    Failed {
        direction: Direction,
        file_name: String,
        error: String,
    },
    Cancelled {
        direction: Direction,
        file_name: String,
    },
}
