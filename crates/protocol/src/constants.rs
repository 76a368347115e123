use std::time::Duration;

/// Default plaintext shard size (19 MiB).
///
/// The remote store rejects objects above 20 MiB; an encrypted shard adds
/// [`NONCE_LEN`] + [`TAG_LEN`] bytes on top of this.
pub const DEFAULT_SHARD_SIZE: u64 = 19 * 1024 * 1024;

/// Largest object the remote store accepts (20 MiB).
pub const MAX_REMOTE_OBJECT_SIZE: u64 = 20 * 1024 * 1024;

/// AES-GCM nonce length prepended to every encrypted shard.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length appended by the cipher.
pub const TAG_LEN: usize = 16;

/// Attempts per shard upload before the file fails.
pub const UPLOAD_MAX_ATTEMPTS: u32 = 10;

/// Attempts per shard download before the file fails.
pub const DOWNLOAD_MAX_ATTEMPTS: u32 = 5;

/// Linear backoff unit: attempt `n` waits `n * RETRY_BASE_DELAY`.
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

/// Added on top of a server-specified `retry_after`.
pub const RATE_LIMIT_MARGIN: Duration = Duration::from_millis(500);

/// Pause between successive shard uploads of one file.
pub const UPLOAD_COOLDOWN: Duration = Duration::from_secs(1);

/// Pause between successive shard deletions.
pub const DELETE_PACING: Duration = Duration::from_millis(350);

/// Download workers on desktop-class clients.
pub const DESKTOP_WORKERS: usize = 5;

/// Download workers on memory-constrained clients.
pub const CONSTRAINED_WORKERS: usize = 3;

/// Above this size an in-memory download asks for confirmation first.
pub const MEMORY_CONFIRM_THRESHOLD: u64 = 500 * 1024 * 1024;
