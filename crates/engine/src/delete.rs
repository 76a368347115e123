//! Best-effort deletion of a file's shards and record.

use relaydrive_protocol::FileRecord;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::EngineError;
use crate::session::Session;
use crate::types::DeleteReport;

/// Deletes every shard of `record`, pausing between deletions, then removes
/// the record itself.
///
/// Shard failures are logged and counted; they never stop the sweep or keep
/// the record alive.
pub async fn delete_record(
    session: &Session,
    record: &FileRecord,
) -> Result<DeleteReport, EngineError> {
    let pacing = session.config().delete_pacing;
    let mut report = DeleteReport::default();

    for (i, handle) in record.parts.iter().enumerate() {
        if i > 0 {
            sleep(pacing).await;
        }
        match session.transport().delete_shard(handle).await {
            Ok(()) => {
                debug!(file_id = %record.file_id, sequence = handle.sequence, "shard deleted");
                report.deleted += 1;
            }
            Err(e) => {
                warn!(
                    file_id = %record.file_id,
                    sequence = handle.sequence,
                    error = %e,
                    "failed to delete shard"
                );
                report.failed += 1;
            }
        }
    }

    session.metadata().delete(&record.file_id).await?;
    info!(
        file_id = %record.file_id,
        deleted = report.deleted,
        failed = report.failed,
        "file deleted"
    );
    Ok(report)
}

/// Looks up `file_id` and deletes it.
pub async fn delete_file(session: &Session, file_id: &str) -> Result<DeleteReport, EngineError> {
    let record = session
        .metadata()
        .get(file_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(file_id.to_string()))?;
    delete_record(session, &record).await
}
