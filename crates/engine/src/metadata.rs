//! File record storage.
//!
//! The engine only needs get/put/delete on complete records. The JSON
//! store keeps every record in one file; the memory store is for tests and
//! short-lived sessions.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::RwLock;

use relaydrive_protocol::{FileRecord, RecordError};
use tracing::debug;

/// Errors from a metadata store.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("refusing to store incomplete record: {0}")]
    InvalidRecord(#[from] RecordError),
}

/// Boxed future returned by [`MetadataStore`] methods.
pub type MetadataFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, MetadataError>> + Send + 'a>>;

/// Key-value store of file records, keyed by `file_id`. No transactions.
pub trait MetadataStore: Send + Sync {
    fn get<'a>(&'a self, file_id: &'a str) -> MetadataFuture<'a, Option<FileRecord>>;

    /// Inserts or replaces a record. Incomplete records are rejected.
    fn put(&self, record: FileRecord) -> MetadataFuture<'_, ()>;

    /// Removes a record; removing a missing record is not an error.
    fn delete<'a>(&'a self, file_id: &'a str) -> MetadataFuture<'a, ()>;

    /// All records, oldest upload first.
    fn list(&self) -> MetadataFuture<'_, Vec<FileRecord>>;
}

fn sorted(records: &BTreeMap<String, FileRecord>) -> Vec<FileRecord> {
    let mut all: Vec<FileRecord> = records.values().cloned().collect();
    all.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
    all
}

// ---------------------------------------------------------------------------
// MemoryMetadataStore
// ---------------------------------------------------------------------------

/// Records held in process memory.
#[derive(Default)]
pub struct MemoryMetadataStore {
    records: RwLock<BTreeMap<String, FileRecord>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn get<'a>(&'a self, file_id: &'a str) -> MetadataFuture<'a, Option<FileRecord>> {
        Box::pin(async move { Ok(self.records.read().unwrap().get(file_id).cloned()) })
    }

    fn put(&self, record: FileRecord) -> MetadataFuture<'_, ()> {
        Box::pin(async move {
            record.validate()?;
            self.records
                .write()
                .unwrap()
                .insert(record.file_id.clone(), record);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, file_id: &'a str) -> MetadataFuture<'a, ()> {
        Box::pin(async move {
            self.records.write().unwrap().remove(file_id);
            Ok(())
        })
    }

    fn list(&self) -> MetadataFuture<'_, Vec<FileRecord>> {
        Box::pin(async move { Ok(sorted(&self.records.read().unwrap())) })
    }
}

// ---------------------------------------------------------------------------
// JsonMetadataStore
// ---------------------------------------------------------------------------

/// Records persisted as a JSON object in a single file.
pub struct JsonMetadataStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, FileRecord>>,
}

impl JsonMetadataStore {
    /// Opens the store, loading existing records from disk.
    pub fn open(path: PathBuf) -> Result<Self, MetadataError> {
        let records = load_records(&path)?;
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `records` to a sibling temp file and renames it over the
    /// store file, so a failed or interrupted write leaves the old file whole.
    fn persist(&self, records: &BTreeMap<String, FileRecord>) -> Result<(), MetadataError> {
        let json = serde_json::to_string_pretty(records)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        let written =
            std::fs::write(&temp, json).and_then(|()| std::fs::rename(&temp, &self.path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }
        debug!("persisted {} record(s) to {:?}", records.len(), self.path);
        Ok(())
    }

    /// Applies `change` to a copy of the records and commits it only once
    /// the copy is on disk.
    fn update(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, FileRecord>) -> bool,
    ) -> Result<(), MetadataError> {
        let mut records = self.records.write().unwrap();
        let mut next = records.clone();
        if !change(&mut next) {
            return Ok(());
        }
        self.persist(&next)?;
        *records = next;
        Ok(())
    }
}

/// Loads records from a JSON file on disk.
fn load_records(path: &Path) -> Result<BTreeMap<String, FileRecord>, MetadataError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let records: BTreeMap<String, FileRecord> = serde_json::from_str(&data)?;
    debug!("loaded {} record(s) from {:?}", records.len(), path);
    Ok(records)
}

impl MetadataStore for JsonMetadataStore {
    fn get<'a>(&'a self, file_id: &'a str) -> MetadataFuture<'a, Option<FileRecord>> {
        Box::pin(async move { Ok(self.records.read().unwrap().get(file_id).cloned()) })
    }

    fn put(&self, record: FileRecord) -> MetadataFuture<'_, ()> {
        Box::pin(async move {
            record.validate()?;
            self.update(|records| {
                records.insert(record.file_id.clone(), record);
                true
            })
        })
    }

    fn delete<'a>(&'a self, file_id: &'a str) -> MetadataFuture<'a, ()> {
        Box::pin(async move { self.update(|records| records.remove(file_id).is_some()) })
    }

    fn list(&self) -> MetadataFuture<'_, Vec<FileRecord>> {
        Box::pin(async move { Ok(sorted(&self.records.read().unwrap())) })
    }
}
