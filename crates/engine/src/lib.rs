//! RelayDrive transfer engine.
//!
//! Library crate with no UI dependencies; front-ends supply a
//! [`RemoteStore`](relaydrive_remote::RemoteStore), a [`MetadataStore`] and
//! a progress callback.
//!
//! # Flows
//!
//! 1. **Upload**: split, encrypt per attempt, upload shards one at a time
//!    with a cool-down, then persist the [`FileRecord`](relaydrive_protocol::FileRecord)
//! 2. **Queue**: upload files in FIFO order; a failed file does not stop
//!    the batch
//! 3. **Download**: K workers fetch, decrypt and place shards into a
//!    [`ShardSink`](relaydrive_transfer::ShardSink)
//! 4. **Delete**: best-effort paced shard deletion, then the record

pub mod config;
pub mod delete;
pub mod download;
pub mod error;
pub mod metadata;
pub mod queue;
pub mod session;
pub mod supervisor;
pub mod types;
pub mod upload;

mod report;

pub use config::{DeviceProfile, EngineConfig};
pub use delete::{delete_file, delete_record};
pub use download::download_file;
pub use error::EngineError;
pub use metadata::{JsonMetadataStore, MemoryMetadataStore, MetadataError, MetadataStore};
pub use queue::{QueuedUpload, UploadOutcome, UploadQueue};
pub use session::Session;
pub use supervisor::TransferSupervisor;
pub use types::{ConfirmCallback, DeleteReport, ProgressCallback, TransferEvent, UploadMeta};
pub use upload::upload_file;
