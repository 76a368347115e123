//! In-process [`RemoteStore`] with scriptable faults.
//!
//! Used by tests. Faults are queued per operation and consumed one call at a
//! time, so a test can say "the next two uploads are rate limited" or
//! "fetching this object always fails".

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::RemoteError;
use crate::store::{RemoteStore, StoreFuture, StoredObject};

const PATH_PREFIX: &str = "documents/";

/// A scripted failure for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Transient(String),
    RateLimited(Duration),
}

impl Fault {
    fn into_error(self) -> RemoteError {
        match self {
            Self::Transient(msg) => RemoteError::Transient(msg),
            Self::RateLimited(retry_after) => RemoteError::RateLimited { retry_after },
        }
    }
}

/// In-memory remote store.
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<State>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Default)]
struct State {
    next_message_id: i64,
    /// remote_id -> (name, bytes)
    objects: HashMap<String, (String, Vec<u8>)>,
    /// message_id -> remote_id
    messages: HashMap<i64, String>,
    put_faults: VecDeque<Fault>,
    fetch_faults: HashMap<String, VecDeque<Fault>>,
    broken: HashSet<String>,
    undeletable: HashSet<i64>,
    fetch_latency: Duration,
    put_calls: Vec<(String, Instant)>,
    fetch_calls: Vec<(String, Instant)>,
    deleted: Vec<i64>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next upload call with `fault`. Faults queue up in order.
    pub fn script_put(&self, fault: Fault) {
        self.state.lock().unwrap().put_faults.push_back(fault);
    }

    /// Fails the next retrieval of `remote_id` with `fault`.
    pub fn script_fetch(&self, remote_id: &str, fault: Fault) {
        self.state
            .lock()
            .unwrap()
            .fetch_faults
            .entry(remote_id.to_string())
            .or_default()
            .push_back(fault);
    }

    /// Makes every retrieval of `remote_id` fail.
    pub fn break_object(&self, remote_id: &str) {
        self.state.lock().unwrap().broken.insert(remote_id.to_string());
    }

    /// Makes deletion of `message_id` fail.
    pub fn refuse_delete(&self, message_id: i64) {
        self.state.lock().unwrap().undeletable.insert(message_id);
    }

    /// Adds a delay to every byte fetch.
    pub fn set_fetch_latency(&self, latency: Duration) {
        self.state.lock().unwrap().fetch_latency = latency;
    }

    /// Replaces the stored bytes of `remote_id`.
    pub fn corrupt(&self, remote_id: &str, bytes: Vec<u8>) {
        if let Some(entry) = self.state.lock().unwrap().objects.get_mut(remote_id) {
            entry.1 = bytes;
        }
    }

    /// Stored bytes of `remote_id`.
    pub fn object(&self, remote_id: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(remote_id)
            .map(|(_, bytes)| bytes.clone())
    }

    /// Names of all stored objects, sorted.
    pub fn object_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state.objects.values().map(|(n, _)| n.clone()).collect();
        names.sort();
        names
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    /// Every upload attempt as `(name, time)`, including failed ones.
    pub fn put_calls(&self) -> Vec<(String, Instant)> {
        self.state.lock().unwrap().put_calls.clone()
    }

    /// Every resolve attempt as `(remote_id, time)`, including failed ones.
    pub fn fetch_calls(&self) -> Vec<(String, Instant)> {
        self.state.lock().unwrap().fetch_calls.clone()
    }

    /// Message ids deleted so far, in order.
    pub fn deleted(&self) -> Vec<i64> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Highest number of concurrent fetches observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn store(&self, name: &str, bytes: Vec<u8>) -> Result<StoredObject, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.put_calls.push((name.to_string(), Instant::now()));
        if let Some(fault) = state.put_faults.pop_front() {
            return Err(fault.into_error());
        }
        state.next_message_id += 1;
        let message_id = state.next_message_id;
        let remote_id = format!("obj-{message_id}");
        state
            .objects
            .insert(remote_id.clone(), (name.to_string(), bytes));
        state.messages.insert(message_id, remote_id.clone());
        Ok(StoredObject {
            message_id,
            remote_id,
        })
    }

    fn lookup(&self, remote_id: &str) -> Result<String, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.fetch_calls.push((remote_id.to_string(), Instant::now()));
        if let Some(fault) = state
            .fetch_faults
            .get_mut(remote_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(fault.into_error());
        }
        if state.broken.contains(remote_id) {
            return Err(RemoteError::Transient(format!("{remote_id} is unavailable")));
        }
        if !state.objects.contains_key(remote_id) {
            return Err(RemoteError::NotFound(remote_id.to_string()));
        }
        Ok(format!("{PATH_PREFIX}{remote_id}"))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let _guard = InFlight::enter(self);

        let latency = self.state.lock().unwrap().fetch_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        path.strip_prefix(PATH_PREFIX)
            .and_then(|id| self.object(id))
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))
    }

    fn remove(&self, message_id: i64) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        if state.undeletable.contains(&message_id) {
            return Err(RemoteError::Api {
                status: 400,
                description: format!("message {message_id} can't be deleted"),
            });
        }
        let remote_id = state
            .messages
            .remove(&message_id)
            .ok_or_else(|| RemoteError::NotFound(format!("message {message_id}")))?;
        state.objects.remove(&remote_id);
        state.deleted.push(message_id);
        Ok(())
    }
}

/// Counts a fetch as in flight until dropped, including when the fetch
/// future is cancelled mid-sleep.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(store: &'a MemoryRemoteStore) -> Self {
        let now = store.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        store.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self {
            counter: &store.in_flight,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RemoteStore for MemoryRemoteStore {
    fn put_object<'a>(&'a self, name: &'a str, bytes: Vec<u8>) -> StoreFuture<'a, StoredObject> {
        Box::pin(async move { self.store(name, bytes) })
    }

    fn resolve<'a>(&'a self, remote_id: &'a str) -> StoreFuture<'a, String> {
        Box::pin(async move { self.lookup(remote_id) })
    }

    fn fetch<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(self.download(path))
    }

    fn delete_object(&self, message_id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.remove(message_id) })
    }
}
