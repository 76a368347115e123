//! Transfer supervisor.
//!
//! Owns the session, allows at most one active upload batch and one active
//! download, forwards progress as [`TransferEvent`]s, and supports
//! cancellation per direction.

use std::sync::{Arc, Mutex};

use relaydrive_protocol::{Direction, FileRecord};
use relaydrive_transfer::{ShardSink, SinkOutput};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::EngineError;
use crate::delete::delete_file;
use crate::download::download_file;
use crate::queue::{QueuedUpload, UploadOutcome, UploadQueue};
use crate::session::Session;
use crate::types::{ConfirmCallback, DeleteReport, ProgressCallback, TransferEvent};

/// Coordinates uploads and downloads for one session.
pub struct TransferSupervisor {
    session: Session,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
    cancel: CancellationToken,
    upload_slot: Mutex<Option<CancellationToken>>,
    download_slot: Mutex<Option<CancellationToken>>,
}

/// Releases a direction's slot when the transfer ends.
struct SlotGuard<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.lock().unwrap().take();
    }
}

impl TransferSupervisor {
    pub fn new(session: Session) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            session,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
            upload_slot: Mutex::new(None),
            download_slot: Mutex::new(None),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn slot(&self, direction: Direction) -> &Mutex<Option<CancellationToken>> {
        match direction {
            Direction::Upload => &self.upload_slot,
            Direction::Download => &self.download_slot,
        }
    }

    fn acquire(
        &self,
        direction: Direction,
    ) -> Result<(SlotGuard<'_>, CancellationToken), EngineError> {
        let slot = self.slot(direction);
        let mut current = slot.lock().unwrap();
        if current.is_some() {
            return Err(EngineError::Busy(direction));
        }
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let token = self.cancel.child_token();
        *current = Some(token.clone());
        Ok((SlotGuard { slot }, token))
    }

    fn forward_progress(&self, direction: Direction) -> ProgressCallback {
        let tx = self.events_tx.clone();
        Arc::new(move |progress| {
            // Progress is lossy under backpressure; terminal events are not.
            let _ = tx.try_send(TransferEvent::Progress {
                direction,
                progress,
            });
        })
    }

    async fn settle(
        &self,
        direction: Direction,
        file_name: String,
        outcome: Result<String, &EngineError>,
    ) {
        let event = match outcome {
            Ok(file_id) => TransferEvent::Completed {
                direction,
                file_name,
                file_id,
            },
            Err(e) if e.is_cancelled() => TransferEvent::Cancelled {
                direction,
                file_name,
            },
            Err(e) => TransferEvent::Failed {
                direction,
                file_name,
                error: e.to_string(),
            },
        };
        let _ = self.events_tx.send(event).await;
    }

    /// Uploads `items` in order. Fails with [`EngineError::Busy`] if an
    /// upload batch is already running.
    pub async fn upload(
        &self,
        items: Vec<QueuedUpload>,
    ) -> Result<Vec<UploadOutcome>, EngineError> {
        let (_slot, token) = self.acquire(Direction::Upload)?;
        let queue = UploadQueue::new();
        for item in items {
            queue.enqueue(item);
        }
        info!(files = queue.pending(), "upload batch started");

        let outcomes = queue
            .run(&self.session, self.forward_progress(Direction::Upload), &token)
            .await;

        for outcome in &outcomes {
            let settled = outcome.result.as_ref().map(|r| r.file_id.clone());
            self.settle(Direction::Upload, outcome.file_name.clone(), settled)
                .await;
        }
        Ok(outcomes)
    }

    /// Downloads `record` into `sink`. Fails with [`EngineError::Busy`] if a
    /// download is already running.
    pub async fn download(
        &self,
        record: &FileRecord,
        sink: Arc<dyn ShardSink>,
        confirm: Option<ConfirmCallback>,
    ) -> Result<SinkOutput, EngineError> {
        let (_slot, token) = self.acquire(Direction::Download)?;

        let result = download_file(
            &self.session,
            record,
            sink,
            self.forward_progress(Direction::Download),
            confirm,
            &token,
        )
        .await;

        let settled = result.as_ref().map(|_| record.file_id.clone());
        self.settle(Direction::Download, record.file_name.clone(), settled)
            .await;
        result
    }

    /// Deletes a stored file.
    pub async fn delete(&self, file_id: &str) -> Result<DeleteReport, EngineError> {
        delete_file(&self.session, file_id).await
    }

    pub fn is_uploading(&self) -> bool {
        self.upload_slot.lock().unwrap().is_some()
    }

    pub fn is_downloading(&self) -> bool {
        self.download_slot.lock().unwrap().is_some()
    }

    /// Cancels the running upload batch, if any. Pending files are dropped.
    pub fn cancel_upload(&self) -> bool {
        self.cancel_direction(Direction::Upload)
    }

    /// Cancels the running download, if any.
    pub fn cancel_download(&self) -> bool {
        self.cancel_direction(Direction::Download)
    }

    fn cancel_direction(&self, direction: Direction) -> bool {
        match self.slot(direction).lock().unwrap().as_ref() {
            Some(token) => {
                warn!(?direction, "cancelling transfer");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels both directions. New transfers may still start.
    pub fn cancel_all(&self) {
        self.cancel_upload();
        self.cancel_download();
    }

    /// Cancels everything, refuses new transfers, and drops the session key.
    pub fn shutdown(&self) {
        info!("supervisor shutting down");
        self.cancel.cancel();
        self.session.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::metadata::{MemoryMetadataStore, MetadataStore};
    use crate::types::UploadMeta;
    use relaydrive_remote::{MemoryRemoteStore, RemoteStore};
    use relaydrive_transfer::{MemorySink, MemorySource};
    use std::time::Duration;

    fn supervisor(remote: &Arc<MemoryRemoteStore>) -> TransferSupervisor {
        let session = Session::new(
            Arc::clone(remote) as Arc<dyn RemoteStore>,
            Arc::new(MemoryMetadataStore::new()) as Arc<dyn MetadataStore>,
            EngineConfig {
                shard_size: 4,
                workers: 1,
                ..EngineConfig::default()
            },
        )
        .unwrap();
        TransferSupervisor::new(session)
    }

    fn item(name: &str, len: usize) -> QueuedUpload {
        QueuedUpload::new(Box::new(MemorySource::new(vec![5u8; len])), UploadMeta::new(name))
    }

    #[tokio::test(start_paused = true)]
    async fn upload_emits_progress_and_completion() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let mut sup = supervisor(&remote);
        let mut events = sup.take_events().unwrap();
        assert!(sup.take_events().is_none());

        let outcomes = sup.upload(vec![item("a", 6)]).await.unwrap();
        let file_id = outcomes[0].result.as_ref().unwrap().file_id.clone();
        assert!(!sup.is_uploading());

        let mut saw_progress = false;
        let mut completed = None;
        while let Ok(event) = events.try_recv() {
            match event {
                TransferEvent::Progress { direction, .. } => {
                    assert_eq!(direction, Direction::Upload);
                    saw_progress = true;
                }
                TransferEvent::Completed { file_id, .. } => completed = Some(file_id),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(saw_progress);
        assert_eq!(completed, Some(file_id));
    }

    #[tokio::test(start_paused = true)]
    async fn second_download_is_busy() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let sup = supervisor(&remote);
        let record = sup.upload(vec![item("a", 8)]).await.unwrap()[0]
            .result
            .as_ref()
            .unwrap()
            .clone();
        remote.set_fetch_latency(Duration::from_secs(1));

        let (first, second) = tokio::join!(
            sup.download(&record, Arc::new(MemorySink::new(2)), None),
            async {
                tokio::task::yield_now().await;
                assert!(sup.is_downloading());
                sup.download(&record, Arc::new(MemorySink::new(2)), None).await
            }
        );
        assert_eq!(first.unwrap(), SinkOutput::Memory(vec![5u8; 8]));
        assert!(matches!(second, Err(EngineError::Busy(Direction::Download))));
        assert!(!sup.is_downloading());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_download_aborts_sink_and_reports() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let mut sup = supervisor(&remote);
        let mut events = sup.take_events().unwrap();
        let record = sup.upload(vec![item("a", 16)]).await.unwrap()[0]
            .result
            .as_ref()
            .unwrap()
            .clone();
        while events.try_recv().is_ok() {}
        remote.set_fetch_latency(Duration::from_secs(5));

        let sink = Arc::new(MemorySink::new(4));
        let (result, _) = tokio::join!(sup.download(&record, sink.clone(), None), async {
            tokio::time::sleep(Duration::from_secs(7)).await;
            assert!(sup.cancel_download());
        });

        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert_eq!(sink.state(), relaydrive_transfer::SinkState::Aborted);
        let mut cancelled = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, TransferEvent::Cancelled { direction: Direction::Download, .. }) {
                cancelled = true;
            }
        }
        assert!(cancelled);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_work() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let sup = supervisor(&remote);
        sup.shutdown();
        let err = sup.upload(vec![item("a", 1)]).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!sup.cancel_upload());
    }
}
