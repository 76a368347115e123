//! Retrying single-shard transport.
//!
//! Every shard operation runs under a [`RetryPolicy`]: a rate-limit answer
//! waits exactly the server's `retry_after` plus a margin, any other failure
//! waits `attempt * base_delay`. Every wait and every network call races the
//! cancellation token.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use relaydrive_protocol::{
    DOWNLOAD_MAX_ATTEMPTS, RATE_LIMIT_MARGIN, RETRY_BASE_DELAY, ShardHandle, UPLOAD_MAX_ATTEMPTS,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::store::{RemoteStore, StoreFuture};
use crate::{RemoteError, TransportError};

/// Attempt budget and wait schedule for one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Attempt `n` failing transiently waits `n * base_delay`.
    pub base_delay: Duration,
    /// Added to a server-specified rate-limit wait.
    pub rate_limit_margin: Duration,
}

impl RetryPolicy {
    pub fn upload() -> Self {
        Self {
            max_attempts: UPLOAD_MAX_ATTEMPTS,
            base_delay: RETRY_BASE_DELAY,
            rate_limit_margin: RATE_LIMIT_MARGIN,
        }
    }

    pub fn download() -> Self {
        Self {
            max_attempts: DOWNLOAD_MAX_ATTEMPTS,
            base_delay: RETRY_BASE_DELAY,
            rate_limit_margin: RATE_LIMIT_MARGIN,
        }
    }

    /// Wait after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, err: &RemoteError) -> Duration {
        match err.retry_after() {
            Some(wait) => wait + self.rate_limit_margin,
            None => self.base_delay * attempt,
        }
    }
}

/// Per-attempt notifications for progress reporting.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardEvent {
    /// Attempt `attempt` of shard `sequence` is starting.
    Attempt { sequence: u32, attempt: u32 },
    /// The server asked us to wait; `wait` includes the margin.
    RateLimited { sequence: u32, wait: Duration },
    /// A transient failure; the next attempt starts after `delay`.
    Retrying {
        sequence: u32,
        attempt: u32,
        delay: Duration,
        error: String,
    },
}

/// Sleeps for `delay` unless `cancel` fires first.
pub async fn sleep_or_cancel(
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Races `fut` against `cancel`.
async fn or_cancel<T>(
    fut: impl Future<Output = Result<T, RemoteError>>,
    cancel: &CancellationToken,
) -> Result<Result<T, RemoteError>, TransportError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        result = fut => Ok(result),
    }
}

/// Shard-level client over a [`RemoteStore`].
#[derive(Clone)]
pub struct TransportClient {
    store: Arc<dyn RemoteStore>,
    upload_policy: RetryPolicy,
    download_policy: RetryPolicy,
}

impl TransportClient {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            upload_policy: RetryPolicy::upload(),
            download_policy: RetryPolicy::download(),
        }
    }

    pub fn with_policies(mut self, upload: RetryPolicy, download: RetryPolicy) -> Self {
        self.upload_policy = upload;
        self.download_policy = download;
        self
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// Uploads shard `sequence` as `object_name`.
    ///
    /// `body` is called once per attempt with the 1-based attempt number, so
    /// encrypted shards get a fresh nonce every time they are sent.
    pub async fn upload_shard<F>(
        &self,
        sequence: u32,
        object_name: &str,
        mut body: F,
        cancel: &CancellationToken,
        on_event: &(dyn Fn(ShardEvent) + Send + Sync),
    ) -> Result<ShardHandle, TransportError>
    where
        F: FnMut(u32) -> Result<Vec<u8>, TransportError> + Send,
    {
        let store = self.store.as_ref();
        let stored = run_with_retry(
            self.upload_policy,
            sequence,
            cancel,
            on_event,
            |attempt| {
                let bytes = body(attempt)?;
                Ok(store.put_object(object_name, bytes))
            },
        )
        .await?;

        debug!(sequence, message_id = stored.message_id, "shard uploaded");
        Ok(ShardHandle {
            sequence,
            message_id: stored.message_id,
            remote_id: stored.remote_id,
        })
    }

    /// Resolves and fetches the bytes of one shard.
    pub async fn download_shard(
        &self,
        handle: &ShardHandle,
        cancel: &CancellationToken,
        on_event: &(dyn Fn(ShardEvent) + Send + Sync),
    ) -> Result<Vec<u8>, TransportError> {
        let store = self.store.as_ref();
        let remote_id = handle.remote_id.as_str();
        let bytes = run_with_retry(
            self.download_policy,
            handle.sequence,
            cancel,
            on_event,
            |_| {
                let attempt: StoreFuture<'_, Vec<u8>> = Box::pin(async move {
                    let path = store.resolve(remote_id).await?;
                    store.fetch(&path).await
                });
                Ok(attempt)
            },
        )
        .await?;

        debug!(sequence = handle.sequence, size = bytes.len(), "shard fetched");
        Ok(bytes)
    }

    /// Deletes one shard. Single attempt; callers treat failure as best-effort.
    pub async fn delete_shard(&self, handle: &ShardHandle) -> Result<(), RemoteError> {
        self.store.delete_object(handle.message_id).await
    }
}

/// Drives `attempt_fn` until it succeeds, the budget runs out, or `cancel`
/// fires.
async fn run_with_retry<'a, T, F>(
    policy: RetryPolicy,
    sequence: u32,
    cancel: &CancellationToken,
    on_event: &(dyn Fn(ShardEvent) + Send + Sync),
    mut attempt_fn: F,
) -> Result<T, TransportError>
where
    F: FnMut(u32) -> Result<StoreFuture<'a, T>, TransportError>,
{
    let mut last_error = String::new();
    let mut attempts = 0;

    while attempts < policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        attempts += 1;
        on_event(ShardEvent::Attempt {
            sequence,
            attempt: attempts,
        });

        let err = match or_cancel(attempt_fn(attempts)?, cancel).await? {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        last_error = err.to_string();

        if !err.is_retryable() {
            error!(sequence, attempt = attempts, error = %err, "shard failed, not retryable");
            break;
        }
        if attempts == policy.max_attempts {
            break;
        }

        let delay = policy.delay_for(attempts, &err);
        if err.retry_after().is_some() {
            warn!(sequence, attempt = attempts, wait_ms = delay.as_millis() as u64, "rate limited");
            on_event(ShardEvent::RateLimited {
                sequence,
                wait: delay,
            });
        } else {
            warn!(
                sequence,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "shard attempt failed, retrying"
            );
            on_event(ShardEvent::Retrying {
                sequence,
                attempt: attempts,
                delay,
                error: last_error.clone(),
            });
        }
        sleep_or_cancel(delay, cancel).await?;
    }

    error!(sequence, attempts, error = %last_error, "shard transfer failed");
    Err(TransportError::ShardTransferFailed {
        sequence,
        attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Fault, MemoryRemoteStore};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn client(store: &Arc<MemoryRemoteStore>) -> TransportClient {
        TransportClient::new(Arc::clone(store) as Arc<dyn RemoteStore>)
    }

    fn plain(bytes: &'static [u8]) -> impl FnMut(u32) -> Result<Vec<u8>, TransportError> + Send {
        move |_| Ok(bytes.to_vec())
    }

    fn ignore(_: ShardEvent) {}

    #[test]
    fn delay_schedule() {
        let policy = RetryPolicy::upload();
        let transient = RemoteError::Transient("reset".into());
        assert_eq!(policy.delay_for(1, &transient), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4, &transient), Duration::from_secs(8));

        let limited = RemoteError::RateLimited {
            retry_after: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(9, &limited), Duration::from_millis(5500));
        assert_eq!(RetryPolicy::download().max_attempts, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn upload_succeeds_first_try() {
        let store = Arc::new(MemoryRemoteStore::new());
        let handle = client(&store)
            .upload_shard(0, "a.part001", plain(b"abc"), &CancellationToken::new(), &ignore)
            .await
            .unwrap();
        assert_eq!(handle.sequence, 0);
        assert_eq!(store.object(&handle.remote_id).unwrap(), b"abc");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_retry_after_plus_margin() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.script_put(Fault::RateLimited(Duration::from_secs(7)));

        let events = Mutex::new(Vec::new());
        let record = |e: ShardEvent| events.lock().unwrap().push(e);
        client(&store)
            .upload_shard(3, "a.part004", plain(b"x"), &CancellationToken::new(), &record)
            .await
            .unwrap();

        let calls = store.put_calls();
        assert_eq!(calls.len(), 2);
        let gap = calls[1].1 - calls[0].1;
        assert!(gap >= Duration::from_millis(7500), "retried after {gap:?}");
        assert!(gap < Duration::from_millis(7600));

        let events = events.into_inner().unwrap();
        assert!(events.contains(&ShardEvent::RateLimited {
            sequence: 3,
            wait: Duration::from_millis(7500)
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_linearly() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.script_put(Fault::Transient("reset".into()));
        store.script_put(Fault::Transient("reset".into()));

        client(&store)
            .upload_shard(0, "a.part001", plain(b"x"), &CancellationToken::new(), &ignore)
            .await
            .unwrap();

        let times: Vec<Instant> = store.put_calls().into_iter().map(|(_, t)| t).collect();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_secs(2));
        assert_eq!(times[2] - times[1], Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn body_is_rebuilt_every_attempt() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.script_put(Fault::Transient("reset".into()));

        let seen = Mutex::new(Vec::new());
        let body = |attempt: u32| {
            seen.lock().unwrap().push(attempt);
            Ok(format!("attempt-{attempt}").into_bytes())
        };
        let handle = client(&store)
            .upload_shard(0, "a.part001", body, &CancellationToken::new(), &ignore)
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(store.object(&handle.remote_id).unwrap(), b"attempt-2");
    }

    #[tokio::test(start_paused = true)]
    async fn prepare_failure_is_not_retried() {
        let store = Arc::new(MemoryRemoteStore::new());
        let body = |_| {
            Err(TransportError::Prepare {
                sequence: 0,
                reason: "boom".into(),
            })
        };
        let err = client(&store)
            .upload_shard(0, "a.part001", body, &CancellationToken::new(), &ignore)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Prepare { .. }));
        assert!(store.put_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn download_exhausts_attempts() {
        let store = Arc::new(MemoryRemoteStore::new());
        let obj = store.put_object("a.part002", b"x".to_vec()).await.unwrap();
        store.break_object(&obj.remote_id);
        let handle = ShardHandle {
            sequence: 1,
            message_id: obj.message_id,
            remote_id: obj.remote_id,
        };

        let err = client(&store)
            .download_shard(&handle, &CancellationToken::new(), &ignore)
            .await
            .unwrap_err();
        match err {
            TransportError::ShardTransferFailed {
                sequence, attempts, ..
            } => {
                assert_eq!(sequence, 1);
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(store.fetch_calls().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn download_recovers_from_rate_limit() {
        let store = Arc::new(MemoryRemoteStore::new());
        let obj = store.put_object("a.part001", b"data".to_vec()).await.unwrap();
        store.script_fetch(&obj.remote_id, Fault::RateLimited(Duration::from_secs(2)));
        let handle = ShardHandle {
            sequence: 0,
            message_id: obj.message_id,
            remote_id: obj.remote_id,
        };

        let bytes = client(&store)
            .download_shard(&handle, &CancellationToken::new(), &ignore)
            .await
            .unwrap();
        assert_eq!(bytes, b"data");
        let calls = store.fetch_calls();
        assert!(calls[1].1 - calls[0].1 >= Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_backoff() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.script_put(Fault::RateLimited(Duration::from_secs(600)));
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            c.cancel();
        });

        let started = Instant::now();
        let err = client(&store)
            .upload_shard(0, "a.part001", plain(b"x"), &cancel, &ignore)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        assert!(Instant::now() - started < Duration::from_secs(2));
        assert_eq!(store.put_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_makes_no_calls() {
        let store = Arc::new(MemoryRemoteStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client(&store)
            .upload_shard(0, "a.part001", plain(b"x"), &cancel, &ignore)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        assert!(store.put_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_or_cancel_completes() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        sleep_or_cancel(Duration::from_secs(1), &cancel).await.unwrap();
        assert_eq!(Instant::now() - started, Duration::from_secs(1));
    }
}
