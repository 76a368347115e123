use std::sync::Arc;

use relaydrive_remote::ShardEvent;
use relaydrive_transfer::TransferTask;

use crate::types::ProgressCallback;

/// Pushes labelled task snapshots to a progress callback.
#[derive(Clone)]
pub(crate) struct Reporter {
    task: Arc<TransferTask>,
    callback: ProgressCallback,
    prefix: Option<String>,
}

impl Reporter {
    pub(crate) fn new(task: Arc<TransferTask>, callback: ProgressCallback) -> Self {
        Self {
            task,
            callback,
            prefix: None,
        }
    }

    /// Prefixes every label with the batch position, e.g.
    /// `Uploading 'a.bin' (2/5)`.
    pub(crate) fn for_batch(mut self, file_name: &str, file_number: u32, batch_total: u32) -> Self {
        self.prefix = Some(format!(
            "Uploading '{file_name}' ({file_number}/{batch_total})"
        ));
        self
    }

    pub(crate) fn task(&self) -> &TransferTask {
        &self.task
    }

    pub(crate) fn emit(&self, label: &str) {
        let label = match &self.prefix {
            Some(prefix) => format!("{prefix}: {label}"),
            None => label.to_string(),
        };
        (self.callback)(self.task.progress(label));
    }

    /// Translates a shard-level retry event into a label.
    pub(crate) fn shard_event(&self, event: &ShardEvent, verb: &str, total: usize) {
        match event {
            ShardEvent::Attempt { sequence, attempt } => {
                self.task.set_shard(*sequence);
                self.emit(&format!(
                    "{verb} part {}/{total} (attempt {attempt})",
                    sequence + 1
                ));
            }
            ShardEvent::RateLimited { wait, .. } => {
                self.emit(&format!("Rate limited. Waiting {:.1}s...", wait.as_secs_f64()));
            }
            ShardEvent::Retrying { sequence, attempt, error, .. } => {
                self.emit(&format!(
                    "Retrying part {}/{total} after attempt {attempt}: {error}",
                    sequence + 1
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaydrive_protocol::Direction;
    use std::sync::Mutex;
    use std::time::Duration;

    fn capture() -> (ProgressCallback, Arc<Mutex<Vec<String>>>) {
        let labels = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&labels);
        let cb: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p.status_label));
        (cb, labels)
    }

    #[test]
    fn shard_events_become_labels() {
        let (cb, labels) = capture();
        let task = Arc::new(TransferTask::new(Direction::Upload, "a.bin", 10));
        let reporter = Reporter::new(Arc::clone(&task), cb);

        reporter.shard_event(&ShardEvent::Attempt { sequence: 1, attempt: 2 }, "Uploading", 3);
        reporter.shard_event(
            &ShardEvent::RateLimited {
                sequence: 1,
                wait: Duration::from_millis(3500),
            },
            "Uploading",
            3,
        );

        assert_eq!(
            *labels.lock().unwrap(),
            vec![
                "Uploading part 2/3 (attempt 2)".to_string(),
                "Rate limited. Waiting 3.5s...".to_string(),
            ]
        );
        assert_eq!(task.progress("").shard_index, Some(1));
    }

    #[test]
    fn batch_prefix() {
        let (cb, labels) = capture();
        let task = Arc::new(TransferTask::new(Direction::Upload, "a.bin", 10));
        Reporter::new(task, cb).for_batch("a.bin", 2, 5).emit("Upload complete!");
        assert_eq!(
            labels.lock().unwrap()[0],
            "Uploading 'a.bin' (2/5): Upload complete!"
        );
    }
}
