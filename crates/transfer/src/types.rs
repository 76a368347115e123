use std::sync::RwLock;
use std::time::Instant;

use relaydrive_protocol::{Direction, TransferProgress, TransferStatus};

use crate::ThroughputMeter;

/// One upload-file or download-file operation (thread-safe).
///
/// Status moves `Pending -> InProgress -> {Completed, Failed, Cancelled}`;
/// once terminal it no longer changes.
pub struct TransferTask {
    meter: ThroughputMeter,
    inner: RwLock<TaskInner>,
}

struct TaskInner {
    id: String,
    direction: Direction,
    file_name: String,
    status: TransferStatus,
    error: String,
    file_number: Option<u32>,
    batch_total: Option<u32>,
    shard_index: Option<u32>,
    completed_at: Option<Instant>,
}

impl TransferTask {
    /// Creates a pending task for `total_bytes` of `file_name`.
    pub fn new(direction: Direction, file_name: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            meter: ThroughputMeter::new(total_bytes),
            inner: RwLock::new(TaskInner {
                id: uuid::Uuid::new_v4().to_string(),
                direction,
                file_name: file_name.into(),
                status: TransferStatus::Pending,
                error: String::new(),
                file_number: None,
                batch_total: None,
                shard_index: None,
                completed_at: None,
            }),
        }
    }

    /// Places the task at 1-based `file_number` of a batch of `batch_total`.
    pub fn with_batch(self, file_number: u32, batch_total: u32) -> Self {
        {
            let mut t = self.inner.write().unwrap();
            t.file_number = Some(file_number);
            t.batch_total = Some(batch_total);
        }
        self
    }

    /// Marks the task as in-progress.
    pub fn start(&self) {
        let mut t = self.inner.write().unwrap();
        if t.status == TransferStatus::Pending {
            t.status = TransferStatus::InProgress;
        }
    }

    /// Records the shard currently being transferred.
    pub fn set_shard(&self, index: u32) {
        self.inner.write().unwrap().shard_index = Some(index);
    }

    /// Adds bytes whose transfer has been confirmed.
    pub fn add_progress(&self, bytes: u64) {
        self.meter.add(bytes);
    }

    pub fn complete(&self) {
        self.finish(TransferStatus::Completed, None);
    }

    pub fn fail(&self, err: &str) {
        self.finish(TransferStatus::Failed, Some(err));
    }

    pub fn cancel(&self) {
        self.finish(TransferStatus::Cancelled, None);
    }

    fn finish(&self, status: TransferStatus, err: Option<&str>) {
        let mut t = self.inner.write().unwrap();
        if t.status.is_terminal() {
            return;
        }
        t.status = status;
        if let Some(err) = err {
            t.error = err.to_string();
        }
        t.completed_at = Some(Instant::now());
    }

    /// Snapshot for progress callbacks, labelled with `label`.
    pub fn progress(&self, label: impl Into<String>) -> TransferProgress {
        let t = self.inner.read().unwrap();
        TransferProgress {
            file_number: t.file_number,
            batch_total: t.batch_total,
            shard_index: t.shard_index,
            ..self.meter.snapshot(t.status.clone(), label)
        }
    }

    /// Returns `true` if the task is pending or in-progress.
    pub fn is_active(&self) -> bool {
        !self.inner.read().unwrap().status.is_terminal()
    }

    pub fn id(&self) -> String {
        self.inner.read().unwrap().id.clone()
    }

    pub fn direction(&self) -> Direction {
        self.inner.read().unwrap().direction
    }

    pub fn file_name(&self) -> String {
        self.inner.read().unwrap().file_name.clone()
    }

    pub fn status(&self) -> TransferStatus {
        self.inner.read().unwrap().status.clone()
    }

    /// Failure reason; empty unless the task failed.
    pub fn error(&self) -> String {
        self.inner.read().unwrap().error.clone()
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.meter.transferred()
    }

    pub fn total_bytes(&self) -> u64 {
        self.meter.total()
    }
}
