use std::time::Duration;

use relaydrive_protocol::{
    CONSTRAINED_WORKERS, DEFAULT_SHARD_SIZE, DELETE_PACING, DESKTOP_WORKERS,
    MEMORY_CONFIRM_THRESHOLD, UPLOAD_COOLDOWN,
};
use relaydrive_remote::RetryPolicy;
use relaydrive_transfer::validate_shard_size;
use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Class of device the engine runs on; decides the download worker count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceProfile {
    #[default]
    Desktop,
    Constrained,
}

impl DeviceProfile {
    pub fn workers(self) -> usize {
        match self {
            Self::Desktop => DESKTOP_WORKERS,
            Self::Constrained => CONSTRAINED_WORKERS,
        }
    }
}

/// Engine tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Plaintext shard size for new uploads. Downloads use the size stored
    /// in the record.
    pub shard_size: u64,
    pub upload_cooldown: Duration,
    pub delete_pacing: Duration,
    /// Download worker pool size.
    pub workers: usize,
    /// In-memory downloads above this size need confirmation.
    pub memory_confirm_threshold: u64,
    pub upload_retry: RetryPolicy,
    pub download_retry: RetryPolicy,
}

impl EngineConfig {
    pub fn for_profile(profile: DeviceProfile) -> Self {
        Self {
            shard_size: DEFAULT_SHARD_SIZE,
            upload_cooldown: UPLOAD_COOLDOWN,
            delete_pacing: DELETE_PACING,
            workers: profile.workers(),
            memory_confirm_threshold: MEMORY_CONFIRM_THRESHOLD,
            upload_retry: RetryPolicy::upload(),
            download_retry: RetryPolicy::download(),
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        validate_shard_size(self.shard_size)?;
        if self.workers == 0 {
            return Err(EngineError::InvalidInput(
                "worker count must be at least 1".into(),
            ));
        }
        if self.upload_retry.max_attempts == 0 || self.download_retry.max_attempts == 0 {
            return Err(EngineError::InvalidInput(
                "retry policies need at least one attempt".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_profile(DeviceProfile::default())
    }
}
