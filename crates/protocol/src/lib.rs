//! Data model and wire types shared by every RelayDrive crate.
//!
//! - [`types`]: file records, shard handles and transfer progress.
//! - [`envelope`]: the JSON envelope spoken by the remote blob store.
//! - [`constants`]: shard geometry and AEAD frame sizes.

pub mod constants;
pub mod envelope;
pub mod types;

pub use constants::{
    CONSTRAINED_WORKERS, DEFAULT_SHARD_SIZE, DELETE_PACING, DESKTOP_WORKERS, DOWNLOAD_MAX_ATTEMPTS,
    MAX_REMOTE_OBJECT_SIZE, MEMORY_CONFIRM_THRESHOLD, NONCE_LEN, RATE_LIMIT_MARGIN,
    RETRY_BASE_DELAY, TAG_LEN, UPLOAD_COOLDOWN, UPLOAD_MAX_ATTEMPTS,
};
pub use envelope::{ApiResponse, Document, RemoteFile, ResponseParameters, SentMessage};
pub use types::{
    Direction, FileRecord, RecordError, ShardHandle, TransferProgress, TransferStatus,
};
