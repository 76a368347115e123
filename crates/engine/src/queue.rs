//! FIFO upload queue.
//!
//! One file uploads at a time. Each file gets its batch number from an
//! explicit counter when it is enqueued; the counter resets once the queue
//! drains. A failed file does not stop the batch, a cancelled one does.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use relaydrive_protocol::{Direction, FileRecord};
use relaydrive_transfer::{ShardSource, TransferTask};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::EngineError;
use crate::report::Reporter;
use crate::session::Session;
use crate::types::{ProgressCallback, UploadMeta};
use crate::upload::run_upload;

/// A file waiting to be uploaded.
pub struct QueuedUpload {
    pub source: Box<dyn ShardSource>,
    pub meta: UploadMeta,
}

impl QueuedUpload {
    pub fn new(source: Box<dyn ShardSource>, meta: UploadMeta) -> Self {
        Self { source, meta }
    }
}

/// Result for one queued file.
#[derive(Debug)]
pub struct UploadOutcome {
    pub file_name: String,
    /// 1-based position within the batch.
    pub file_number: u32,
    pub result: Result<FileRecord, EngineError>,
}

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<(u32, QueuedUpload)>,
    next_number: u32,
    batch_total: u32,
}

/// Strict FIFO upload queue.
#[derive(Default)]
pub struct UploadQueue {
    inner: Mutex<QueueInner>,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a file; returns its 1-based batch number.
    pub fn enqueue(&self, item: QueuedUpload) -> u32 {
        let mut q = self.inner.lock().unwrap();
        q.next_number += 1;
        q.batch_total += 1;
        let number = q.next_number;
        debug!(file = %item.meta.file_name, number, "queued upload");
        q.pending.push_back((number, item));
        number
    }

    /// Files not yet started.
    pub fn pending(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    /// Files enqueued in the current batch, including finished ones.
    pub fn batch_total(&self) -> u32 {
        self.inner.lock().unwrap().batch_total
    }

    fn next(&self) -> Option<(u32, u32, QueuedUpload)> {
        let mut q = self.inner.lock().unwrap();
        match q.pending.pop_front() {
            Some((number, item)) => Some((number, q.batch_total, item)),
            None => {
                q.next_number = 0;
                q.batch_total = 0;
                None
            }
        }
    }

    /// Uploads every queued file in order, including files enqueued while
    /// running. Returns one outcome per file.
    pub async fn run(
        &self,
        session: &Session,
        on_progress: ProgressCallback,
        cancel: &CancellationToken,
    ) -> Vec<UploadOutcome> {
        let mut outcomes = Vec::new();

        while let Some((file_number, batch_total, item)) = self.next() {
            let file_name = item.meta.file_name.clone();
            if cancel.is_cancelled() {
                debug!(file = %file_name, "dropping queued upload after cancel");
                outcomes.push(UploadOutcome {
                    file_name,
                    file_number,
                    result: Err(EngineError::Cancelled),
                });
                continue;
            }

            info!(file = %file_name, file_number, batch_total, "starting queued upload");
            let task = Arc::new(
                TransferTask::new(Direction::Upload, file_name.as_str(), item.source.size())
                    .with_batch(file_number, batch_total),
            );
            let reporter = Reporter::new(task, Arc::clone(&on_progress)).for_batch(
                &file_name,
                file_number,
                batch_total,
            );
            let result =
                run_upload(session, item.source.as_ref(), &item.meta, &reporter, cancel).await;

            outcomes.push(UploadOutcome {
                file_name,
                file_number,
                result,
            });
        }
        outcomes
    }
}
