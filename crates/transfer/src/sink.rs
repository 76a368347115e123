use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::TransferError;

/// Lifecycle of a sink. Only `Open` accepts writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Open,
    Finished,
    Aborted,
}

/// What a finished sink produced.
#[derive(Debug, PartialEq, Eq)]
pub enum SinkOutput {
    /// Bytes were written to this path.
    File(PathBuf),
    /// The assembled bytes, in order.
    Memory(Vec<u8>),
}

/// Destination for downloaded shards.
///
/// Shards may arrive in any order and from several workers at once, so
/// every method takes `&self`.
pub trait ShardSink: Send + Sync {
    /// Writes one shard's plaintext at absolute `offset`.
    fn write_shard(&self, sequence: u32, offset: u64, bytes: &[u8]) -> Result<(), TransferError>;

    /// Completes the sink once every expected shard is present.
    fn finish(&self) -> Result<SinkOutput, TransferError>;

    /// Discards whatever was written. Safe to call more than once.
    fn abort(&self);

    fn state(&self) -> SinkState;

    /// Whether the whole file ends up in memory before delivery.
    fn buffers_in_memory(&self) -> bool;
}

/// Marks `sequence` as placed, rejecting duplicates and out-of-range shards.
fn claim(placed: &mut [bool], sequence: u32) -> Result<(), TransferError> {
    let expected = placed.len() as u32;
    let slot = placed
        .get_mut(sequence as usize)
        .ok_or(TransferError::ShardOutOfRange { sequence, expected })?;
    if *slot {
        return Err(TransferError::DuplicateShard(sequence));
    }
    *slot = true;
    Ok(())
}

fn placed_count(placed: &[bool]) -> u32 {
    placed.iter().filter(|p| **p).count() as u32
}

// ---------------------------------------------------------------------------
// FileSink
// ---------------------------------------------------------------------------

/// Writes shards into `<dest>.part` and renames it to `dest` on finish.
pub struct FileSink {
    dest: PathBuf,
    temp: PathBuf,
    inner: Mutex<FileInner>,
}

struct FileInner {
    file: Option<File>,
    placed: Vec<bool>,
    state: SinkState,
}

impl FileSink {
    /// Creates the temporary file next to `dest`, truncating any leftover.
    pub fn create(dest: &Path, expected_shards: u32) -> Result<Self, TransferError> {
        if expected_shards == 0 {
            return Err(TransferError::InvalidInput(
                "a sink needs at least one shard".into(),
            ));
        }
        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let temp = temp_path(dest);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp)?;
        debug!(dest = %dest.display(), expected_shards, "file sink opened");

        Ok(Self {
            dest: dest.to_path_buf(),
            temp,
            inner: Mutex::new(FileInner {
                file: Some(file),
                placed: vec![false; expected_shards as usize],
                state: SinkState::Open,
            }),
        })
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Path of the in-progress file.
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }
}

fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

impl ShardSink for FileSink {
    fn write_shard(&self, sequence: u32, offset: u64, bytes: &[u8]) -> Result<(), TransferError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != SinkState::Open {
            return Err(TransferError::SinkClosed(inner.state));
        }
        claim(&mut inner.placed, sequence)?;

        let written = match inner.file.as_mut() {
            Some(file) => file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| file.write_all(bytes)),
            None => return Err(TransferError::SinkClosed(inner.state)),
        };
        if let Err(e) = written {
            // Leave the slot free so the caller sees a clean failure.
            inner.placed[sequence as usize] = false;
            return Err(e.into());
        }
        Ok(())
    }

    fn finish(&self) -> Result<SinkOutput, TransferError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != SinkState::Open {
            return Err(TransferError::SinkClosed(inner.state));
        }
        let placed = placed_count(&inner.placed);
        let expected = inner.placed.len() as u32;
        if placed != expected {
            return Err(TransferError::Incomplete { placed, expected });
        }

        if let Some(file) = inner.file.take() {
            file.sync_all()?;
        }
        std::fs::rename(&self.temp, &self.dest)?;
        inner.state = SinkState::Finished;
        debug!(dest = %self.dest.display(), "file sink finished");
        Ok(SinkOutput::File(self.dest.clone()))
    }

    fn abort(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != SinkState::Open {
            return;
        }
        inner.file = None;
        inner.state = SinkState::Aborted;
        if let Err(e) = std::fs::remove_file(&self.temp)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.temp.display(), error = %e, "failed to remove partial file");
        }
        debug!(dest = %self.dest.display(), "file sink aborted");
    }

    fn state(&self) -> SinkState {
        self.inner.lock().unwrap().state
    }

    fn buffers_in_memory(&self) -> bool {
        false
    }
}

/// A sink dropped while still open (its download future was dropped
/// mid-flight) removes the partial file like an explicit abort.
impl Drop for FileSink {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.state != SinkState::Open {
            return;
        }
        inner.file = None;
        inner.state = SinkState::Aborted;
        match std::fs::remove_file(&self.temp) {
            Ok(()) => debug!(dest = %self.dest.display(), "dropped open file sink"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.temp.display(), error = %e, "failed to remove partial file")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// Holds every shard in memory and concatenates them on finish.
///
/// Shards are keyed by sequence; since all shards but the last are exactly
/// one shard size long, sequence order is offset order.
pub struct MemorySink {
    inner: Mutex<MemoryInner>,
}

struct MemoryInner {
    shards: Vec<Option<Vec<u8>>>,
    state: SinkState,
}

impl MemorySink {
    pub fn new(expected_shards: u32) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                shards: vec![None; expected_shards as usize],
                state: SinkState::Open,
            }),
        }
    }

    /// Bytes buffered so far.
    pub fn buffered_bytes(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.shards.iter().flatten().map(|s| s.len() as u64).sum()
    }
}

impl ShardSink for MemorySink {
    fn write_shard(&self, sequence: u32, _offset: u64, bytes: &[u8]) -> Result<(), TransferError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != SinkState::Open {
            return Err(TransferError::SinkClosed(inner.state));
        }
        let expected = inner.shards.len() as u32;
        let slot = inner
            .shards
            .get_mut(sequence as usize)
            .ok_or(TransferError::ShardOutOfRange { sequence, expected })?;
        if slot.is_some() {
            return Err(TransferError::DuplicateShard(sequence));
        }
        *slot = Some(bytes.to_vec());
        Ok(())
    }

    fn finish(&self) -> Result<SinkOutput, TransferError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != SinkState::Open {
            return Err(TransferError::SinkClosed(inner.state));
        }
        let expected = inner.shards.len() as u32;
        let placed = inner.shards.iter().filter(|s| s.is_some()).count() as u32;
        if placed != expected {
            return Err(TransferError::Incomplete { placed, expected });
        }

        let total = inner.shards.iter().flatten().map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for shard in inner.shards.drain(..).flatten() {
            out.extend_from_slice(&shard);
        }
        inner.state = SinkState::Finished;
        Ok(SinkOutput::Memory(out))
    }

    fn abort(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != SinkState::Open {
            return;
        }
        inner.shards.clear();
        inner.state = SinkState::Aborted;
    }

    fn state(&self) -> SinkState {
        self.inner.lock().unwrap().state
    }

    fn buffers_in_memory(&self) -> bool {
        true
    }
}
