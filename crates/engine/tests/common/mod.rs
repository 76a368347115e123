#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use relaydrive_crypto::{EncryptionKey, derive_key_with_iterations};
use relaydrive_engine::{
    EngineConfig, MemoryMetadataStore, MetadataStore, ProgressCallback, Session, UploadMeta,
    upload_file,
};
use relaydrive_protocol::{FileRecord, TransferProgress};
use relaydrive_remote::{MemoryRemoteStore, RemoteStore};
use relaydrive_transfer::MemorySource;
use tokio_util::sync::CancellationToken;

pub const MIB: usize = 1024 * 1024;

const SALT: [u8; 16] = *b"relaydrive-salt!";

pub struct Env {
    pub remote: Arc<MemoryRemoteStore>,
    pub metadata: Arc<MemoryMetadataStore>,
    pub session: Session,
}

impl Env {
    pub fn new(config: EngineConfig) -> Self {
        let remote = Arc::new(MemoryRemoteStore::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let session = Session::new(
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            Arc::clone(&metadata) as Arc<dyn MetadataStore>,
            config,
        )
        .unwrap();
        Self {
            remote,
            metadata,
            session,
        }
    }

    /// A second session over the same remote and metadata stores.
    pub fn another_session(&self) -> Session {
        Session::new(
            Arc::clone(&self.remote) as Arc<dyn RemoteStore>,
            Arc::clone(&self.metadata) as Arc<dyn MetadataStore>,
            self.session.config().clone(),
        )
        .unwrap()
    }

    pub async fn upload(&self, name: &str, data: Vec<u8>) -> FileRecord {
        upload_file(
            &self.session,
            &MemorySource::new(data),
            &UploadMeta::new(name),
            Arc::new(|_| {}),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
    }
}

/// Small-shard config so tests stay fast.
pub fn small_config(shard_size: u64, workers: usize) -> EngineConfig {
    EngineConfig {
        shard_size,
        workers,
        ..EngineConfig::default()
    }
}

/// Fast key derivation for tests.
pub fn key(password: &str) -> EncryptionKey {
    derive_key_with_iterations(password, &SALT, 1000).unwrap()
}

/// Deterministic, non-repeating test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Collects every progress snapshot.
pub fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<TransferProgress>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let cb: ProgressCallback = Arc::new(move |p: TransferProgress| sink.lock().unwrap().push(p));
    (cb, seen)
}

pub fn labels(seen: &Mutex<Vec<TransferProgress>>) -> Vec<String> {
    seen.lock()
        .unwrap()
        .iter()
        .map(|p| p.status_label.clone())
        .collect()
}
