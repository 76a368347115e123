//! Sequential shard upload for one file.
//!
//! The pipeline:
//! 1. Validate the name, split the source into shards
//! 2. For each shard in order: wait the cool-down (not before the first),
//!    read, encrypt per attempt, upload with retries
//! 3. Build the [`FileRecord`] from the collected handles and persist it
//!
//! Nothing is persisted unless every shard was accepted.

use std::sync::Arc;

use chrono::Utc;
use relaydrive_crypto::{EncryptionKey, encrypt_shard};
use relaydrive_protocol::{Direction, FileRecord};
use relaydrive_remote::{ShardEvent, TransportError, object_name, sleep_or_cancel};
use relaydrive_transfer::{ShardSource, TransferTask, split, validate_file_name};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::EngineError;
use crate::report::Reporter;
use crate::session::Session;
use crate::types::{ProgressCallback, UploadMeta};

/// Uploads `source` as a new file and persists its record.
///
/// Shards are encrypted when the session holds a key.
pub async fn upload_file(
    session: &Session,
    source: &dyn ShardSource,
    meta: &UploadMeta,
    on_progress: ProgressCallback,
    cancel: &CancellationToken,
) -> Result<FileRecord, EngineError> {
    let task = Arc::new(TransferTask::new(
        Direction::Upload,
        meta.file_name.as_str(),
        source.size(),
    ));
    run_upload(session, source, meta, &Reporter::new(task, on_progress), cancel).await
}

/// Runs one upload and settles its task with a final labelled report.
pub(crate) async fn run_upload(
    session: &Session,
    source: &dyn ShardSource,
    meta: &UploadMeta,
    reporter: &Reporter,
    cancel: &CancellationToken,
) -> Result<FileRecord, EngineError> {
    let result = upload_shards(session, source, meta, reporter, cancel).await;
    let task = reporter.task();

    match &result {
        Ok(record) => {
            task.complete();
            info!(
                file_id = %record.file_id,
                file = %record.file_name,
                parts = record.parts.len(),
                "upload completed"
            );
            reporter.emit("Upload complete!");
        }
        Err(e) if e.is_cancelled() => {
            task.cancel();
            warn!(file = %meta.file_name, "upload cancelled");
            reporter.emit("Cancelled");
        }
        Err(e) => {
            let reason = e.to_string();
            task.fail(&reason);
            error!(file = %meta.file_name, error = %reason, "upload failed");
            reporter.emit(&format!("Failed: {reason}"));
        }
    }
    result
}

async fn upload_shards(
    session: &Session,
    source: &dyn ShardSource,
    meta: &UploadMeta,
    reporter: &Reporter,
    cancel: &CancellationToken,
) -> Result<FileRecord, EngineError> {
    validate_file_name(&meta.file_name)?;
    let config = session.config();
    let file_size = source.size();
    let ranges = split(file_size, config.shard_size)?;
    let total = ranges.len();

    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let key = session.key();
    let task = reporter.task();
    task.start();
    info!(
        file = %meta.file_name,
        size = file_size,
        shards = total,
        encrypted = key.is_some(),
        "upload started"
    );

    let on_event = |event: ShardEvent| reporter.shard_event(&event, "Uploading", total);
    let mut parts = Vec::with_capacity(total);

    for range in &ranges {
        if range.sequence > 0 {
            sleep_or_cancel(config.upload_cooldown, cancel).await?;
        }

        let plain = source.read_shard(range)?;
        let name = object_name(&meta.file_name, range.sequence);
        let handle = session
            .transport()
            .upload_shard(
                range.sequence,
                &name,
                |_| seal(&plain, key.as_deref(), range.sequence),
                cancel,
                &on_event,
            )
            .await?;

        parts.push(handle);
        task.add_progress(range.len);
        reporter.emit(&format!("Uploaded part {}/{total}", range.sequence + 1));
    }

    let record = FileRecord {
        file_id: uuid::Uuid::new_v4().to_string(),
        file_name: meta.file_name.clone(),
        file_size,
        file_type: meta.file_type.clone(),
        encrypted: key.is_some(),
        shard_size: config.shard_size,
        parts,
        uploaded_at: Utc::now(),
        parent_id: meta.parent_id.clone(),
    };
    record
        .validate()
        .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
    session.metadata().put(record.clone()).await?;
    Ok(record)
}

/// Builds the body for one attempt. Encrypted shards get a fresh nonce
/// every call.
fn seal(
    plain: &[u8],
    key: Option<&EncryptionKey>,
    sequence: u32,
) -> Result<Vec<u8>, TransportError> {
    match key {
        Some(key) => encrypt_shard(plain, key).map_err(|e| TransportError::Prepare {
            sequence,
            reason: e.to_string(),
        }),
        None => Ok(plain.to_vec()),
    }
}
