//! Parallel shard download into a [`ShardSink`].
//!
//! K workers share a FIFO of shard sequences. Each worker claims the next
//! sequence, fetches it, decrypts it and places it at its offset. The first
//! fatal shard error stops every worker and aborts the sink.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use relaydrive_crypto::{EncryptionKey, decrypt_shard};
use relaydrive_protocol::{Direction, FileRecord};
use relaydrive_remote::ShardEvent;
use relaydrive_transfer::{ShardSink, SinkOutput, TransferTask, place, validate_record};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::EngineError;
use crate::report::Reporter;
use crate::session::Session;
use crate::types::{ConfirmCallback, ProgressCallback};

/// Downloads `record` into `sink`.
///
/// When the sink buffers in memory and the file is larger than the
/// configured threshold, `confirm` is asked first; a refusal (or no
/// callback) ends the download as [`EngineError::Cancelled`] before any
/// network call. On any error the sink is aborted.
pub async fn download_file(
    session: &Session,
    record: &FileRecord,
    sink: Arc<dyn ShardSink>,
    on_progress: ProgressCallback,
    confirm: Option<ConfirmCallback>,
    cancel: &CancellationToken,
) -> Result<SinkOutput, EngineError> {
    let task = Arc::new(TransferTask::new(
        Direction::Download,
        record.file_name.as_str(),
        record.file_size,
    ));
    let reporter = Reporter::new(task, on_progress);

    let result = run_download(session, record, &sink, &reporter, confirm, cancel).await;
    let task = reporter.task();

    match &result {
        Ok(_) => {
            task.complete();
            info!(file_id = %record.file_id, file = %record.file_name, "download completed");
            reporter.emit("Download complete!");
        }
        Err(e) if e.is_cancelled() => {
            sink.abort();
            task.cancel();
            warn!(file_id = %record.file_id, "download cancelled");
            reporter.emit("Cancelled");
        }
        Err(e) => {
            sink.abort();
            let reason = e.to_string();
            task.fail(&reason);
            error!(file_id = %record.file_id, error = %reason, "download failed");
            reporter.emit(&format!("Failed: {reason}"));
        }
    }
    result
}

async fn run_download(
    session: &Session,
    record: &FileRecord,
    sink: &Arc<dyn ShardSink>,
    reporter: &Reporter,
    confirm: Option<ConfirmCallback>,
    cancel: &CancellationToken,
) -> Result<SinkOutput, EngineError> {
    validate_record(record)?;

    let key = session.key();
    if record.encrypted && key.is_none() {
        return Err(EngineError::KeyRequired);
    }

    let threshold = session.config().memory_confirm_threshold;
    if sink.buffers_in_memory() && record.file_size > threshold {
        let confirmed = confirm.is_some_and(|ask| ask(record.file_size));
        if !confirmed {
            info!(
                file_id = %record.file_id,
                size = record.file_size,
                "in-memory download declined"
            );
            return Err(EngineError::Cancelled);
        }
    }

    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let total = record.parts.len();
    let workers = session.config().workers.min(total).max(1);
    reporter.task().start();
    info!(
        file_id = %record.file_id,
        file = %record.file_name,
        size = record.file_size,
        shards = total,
        workers,
        "download started"
    );

    let child = cancel.child_token();
    let shared = Arc::new(Shared {
        session: session.clone(),
        record: record.clone(),
        sink: Arc::clone(sink),
        key: if record.encrypted { key } else { None },
        queue: Mutex::new((0..total as u32).collect()),
        completed: AtomicU32::new(0),
        reporter: reporter.clone(),
        cancel: child.clone(),
    });

    let mut set = JoinSet::new();
    for id in 0..workers {
        set.spawn(worker(Arc::clone(&shared), id));
    }

    let mut failure: Option<EngineError> = None;
    while let Some(joined) = set.join_next().await {
        let outcome = joined.unwrap_or_else(|e| Err(EngineError::Worker(e.to_string())));
        match outcome {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                if failure.is_none() {
                    // Stop the other workers claiming more shards.
                    child.cancel();
                    failure = Some(e);
                }
            }
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    reporter.emit("Assembling file...");
    Ok(sink.finish()?)
}

/// State shared by the workers of one download.
struct Shared {
    session: Session,
    record: FileRecord,
    sink: Arc<dyn ShardSink>,
    key: Option<Arc<EncryptionKey>>,
    queue: Mutex<VecDeque<u32>>,
    completed: AtomicU32,
    reporter: Reporter,
    cancel: CancellationToken,
}

impl Shared {
    fn claim(&self) -> Option<u32> {
        self.queue.lock().unwrap().pop_front()
    }
}

async fn worker(shared: Arc<Shared>, id: usize) -> Result<(), EngineError> {
    let total = shared.record.parts.len();
    let on_event = |event: ShardEvent| shared.reporter.shard_event(&event, "Downloading", total);

    loop {
        if shared.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let Some(sequence) = shared.claim() else {
            debug!(worker = id, "work queue empty");
            return Ok(());
        };

        let handle = &shared.record.parts[sequence as usize];
        let bytes = shared
            .session
            .transport()
            .download_shard(handle, &shared.cancel, &on_event)
            .await?;

        let plain = match &shared.key {
            Some(key) => decrypt_shard(&bytes, key).map_err(|_| {
                error!(sequence, "shard failed authentication");
                EngineError::AuthenticationFailure { sequence }
            })?,
            None => bytes,
        };

        let expected = shared.record.shard_len(sequence);
        if plain.len() as u64 != expected {
            return Err(EngineError::InvalidInput(format!(
                "shard {sequence} is {} bytes, expected {expected}",
                plain.len()
            )));
        }

        place(
            shared.sink.as_ref(),
            shared.record.shard_size,
            sequence,
            &plain,
        )?;
        shared.reporter.task().add_progress(expected);

        let done = shared.completed.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(sequence, worker = id, done, total, "shard placed");
        shared.reporter.emit(&format!("Downloaded part {done}/{total}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::metadata::{MemoryMetadataStore, MetadataStore};
    use crate::types::UploadMeta;
    use crate::upload::upload_file;
    use relaydrive_remote::{MemoryRemoteStore, RemoteStore};
    use relaydrive_transfer::{MemorySink, MemorySource, SinkState};

    fn session(remote: &Arc<MemoryRemoteStore>, shard_size: u64) -> Session {
        let config = EngineConfig {
            shard_size,
            memory_confirm_threshold: 64,
            ..EngineConfig::default()
        };
        Session::new(
            Arc::clone(remote) as Arc<dyn RemoteStore>,
            Arc::new(MemoryMetadataStore::new()) as Arc<dyn MetadataStore>,
            config,
        )
        .unwrap()
    }

    async fn uploaded(s: &Session, data: Vec<u8>) -> FileRecord {
        upload_file(
            s,
            &MemorySource::new(data),
            &UploadMeta::new("f.bin"),
            Arc::new(|_| {}),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn plain_download_into_memory() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let s = session(&remote, 8);
        let data: Vec<u8> = (0..30u8).collect();
        let record = uploaded(&s, data.clone()).await;

        let sink = Arc::new(MemorySink::new(record.parts.len() as u32));
        let out = download_file(
            &s,
            &record,
            sink.clone(),
            Arc::new(|_| {}),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(out, SinkOutput::Memory(data));
        assert_eq!(sink.state(), SinkState::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_record_is_rejected() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let s = session(&remote, 8);
        let mut record = uploaded(&s, vec![0u8; 20]).await;
        record.parts.swap(0, 1);

        let sink = Arc::new(MemorySink::new(3));
        let err = download_file(
            &s,
            &record,
            sink.clone(),
            Arc::new(|_| {}),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert_eq!(sink.state(), SinkState::Aborted);
        assert!(remote.fetch_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn encrypted_record_needs_key() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let s = session(&remote, 8);
        let mut record = uploaded(&s, vec![0u8; 4]).await;
        record.encrypted = true;

        let err = download_file(
            &s,
            &record,
            Arc::new(MemorySink::new(1)),
            Arc::new(|_| {}),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::KeyRequired));
    }

    #[tokio::test(start_paused = true)]
    async fn large_in_memory_download_asks_first() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let s = session(&remote, 32);
        let record = uploaded(&s, vec![3u8; 100]).await;

        let asked = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::clone(&asked);
        let confirm: ConfirmCallback = Arc::new(move |size| {
            a.lock().unwrap().push(size);
            true
        });

        let out = download_file(
            &s,
            &record,
            Arc::new(MemorySink::new(4)),
            Arc::new(|_| {}),
            Some(confirm),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(out, SinkOutput::Memory(vec![3u8; 100]));
        assert_eq!(*asked.lock().unwrap(), vec![100]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_confirm_counts_as_refusal() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let s = session(&remote, 32);
        let record = uploaded(&s, vec![3u8; 100]).await;

        let err = download_file(
            &s,
            &record,
            Arc::new(MemorySink::new(4)),
            Arc::new(|_| {}),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
        assert!(remote.fetch_calls().is_empty());
    }
}
