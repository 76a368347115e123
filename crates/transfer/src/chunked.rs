use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::TransferError;
use crate::sink::ShardSink;

/// One shard's position within its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRange {
    pub sequence: u32,
    /// Absolute byte offset (`sequence * shard_size`).
    pub offset: u64,
    pub len: u64,
}

// ---------------------------------------------------------------------------
// Split / place
// ---------------------------------------------------------------------------

/// Byte offset of shard `sequence`.
pub fn shard_offset(sequence: u32, shard_size: u64) -> u64 {
    sequence as u64 * shard_size
}

/// Splits a file of `file_size` bytes into ordered shard ranges.
///
/// Every range is `shard_size` long except the last, which holds the
/// remainder. A zero-byte file yields a single zero-length shard so that
/// every record has at least one part.
pub fn split(file_size: u64, shard_size: u64) -> Result<Vec<ShardRange>, TransferError> {
    if shard_size == 0 {
        return Err(TransferError::InvalidInput("shard size must be non-zero".into()));
    }
    let count = file_size.div_ceil(shard_size).max(1);
    let count = u32::try_from(count).map_err(|_| {
        TransferError::InvalidInput(format!("{file_size} bytes needs {count} shards"))
    })?;

    let ranges = (0..count)
        .map(|sequence| {
            let offset = shard_offset(sequence, shard_size);
            ShardRange {
                sequence,
                offset,
                len: (file_size - offset).min(shard_size),
            }
        })
        .collect();
    Ok(ranges)
}

/// Writes `bytes` for shard `sequence` at its absolute offset in `sink`.
pub fn place(
    sink: &dyn ShardSink,
    shard_size: u64,
    sequence: u32,
    bytes: &[u8],
) -> Result<(), TransferError> {
    if bytes.len() as u64 > shard_size {
        return Err(TransferError::InvalidInput(format!(
            "shard {sequence} is {} bytes, larger than shard size {shard_size}",
            bytes.len()
        )));
    }
    sink.write_shard(sequence, shard_offset(sequence, shard_size), bytes)
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Random-access plaintext source for uploads.
pub trait ShardSource: Send + Sync {
    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Reads the bytes covered by `range`.
    fn read_shard(&self, range: &ShardRange) -> Result<Vec<u8>, TransferError>;
}

/// Source backed by an in-memory buffer.
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ShardSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_shard(&self, range: &ShardRange) -> Result<Vec<u8>, TransferError> {
        let start = range.offset as usize;
        let end = start + range.len as usize;
        self.data
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                TransferError::InvalidInput(format!(
                    "range {start}..{end} exceeds {} bytes",
                    self.data.len()
                ))
            })
    }
}

/// Source backed by a file on disk, read with seek + read.
pub struct FileSource {
    file: Mutex<std::fs::File>,
    path: PathBuf,
    size: u64,
}

impl FileSource {
    /// Opens `path` for shard reads.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ShardSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_shard(&self, range: &ShardRange) -> Result<Vec<u8>, TransferError> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(range.offset))?;
        let mut buf = vec![0u8; range.len as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}
