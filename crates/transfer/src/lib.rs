//! Chunk codec and reassembly for RelayDrive transfers.
//!
//! - [`split`] turns a file size into ordered shard ranges.
//! - [`ShardSource`] reads plaintext shards for upload.
//! - [`ShardSink`] receives downloaded shards at their absolute offsets,
//!   either into a file ([`FileSink`]) or into memory ([`MemorySink`]).
//! - [`TransferTask`] and [`ThroughputMeter`] track one file's progress.

mod chunked;
mod progress;
mod sink;
mod types;
mod validation;

pub use chunked::{
    FileSource, MemorySource, ShardRange, ShardSource, place, shard_offset, split,
};
pub use progress::{ThroughputMeter, format_eta, format_speed};
pub use sink::{FileSink, MemorySink, ShardSink, SinkOutput, SinkState};
pub use types::TransferTask;
pub use validation::{validate_file_name, validate_record, validate_shard_size};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("shard {0} was already placed")]
    DuplicateShard(u32),

    #[error("shard {sequence} is outside the expected {expected} shards")]
    ShardOutOfRange { sequence: u32, expected: u32 },

    #[error("sink incomplete: {placed} of {expected} shards placed")]
    Incomplete { placed: u32, expected: u32 },

    #[error("sink is {0:?}")]
    SinkClosed(SinkState),
}
