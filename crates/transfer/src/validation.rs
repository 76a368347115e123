use relaydrive_protocol::{FileRecord, MAX_REMOTE_OBJECT_SIZE, NONCE_LEN, TAG_LEN};

use crate::TransferError;

/// Validates a file name used for remote object names.
///
/// Rejects:
/// - Empty or whitespace-only names
/// - Path separators (`/`, `\`)
/// - Control characters
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.trim().is_empty() {
        return Err(TransferError::InvalidInput("empty file name".into()));
    }
    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidInput(format!(
            "path separator not allowed in file name: {name}"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(TransferError::InvalidInput(format!(
            "control character in file name: {name:?}"
        )));
    }
    Ok(())
}

/// Validates a shard size: non-zero, and small enough that an encrypted
/// frame still fits the remote object cap.
pub fn validate_shard_size(shard_size: u64) -> Result<(), TransferError> {
    if shard_size == 0 {
        return Err(TransferError::InvalidInput("shard size must be non-zero".into()));
    }
    let framed = shard_size + (NONCE_LEN + TAG_LEN) as u64;
    if framed > MAX_REMOTE_OBJECT_SIZE {
        return Err(TransferError::InvalidInput(format!(
            "shard size {shard_size} exceeds remote object limit {MAX_REMOTE_OBJECT_SIZE}"
        )));
    }
    Ok(())
}

/// Checks a record before it is used for download or deletion.
pub fn validate_record(record: &FileRecord) -> Result<(), TransferError> {
    record
        .validate()
        .map_err(|e| TransferError::InvalidInput(format!("record {}: {e}", record.file_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relaydrive_protocol::{DEFAULT_SHARD_SIZE, ShardHandle};

    #[test]
    fn rejects_empty_name() {
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("   ").is_err());
    }

    #[test]
    fn rejects_separators() {
        assert!(validate_file_name("../etc/passwd").is_err());
        assert!(validate_file_name("dir\\file.txt").is_err());
    }

    #[test]
    fn rejects_control_chars() {
        assert!(validate_file_name("bad\nname").is_err());
    }

    #[test]
    fn accepts_ordinary_names() {
        assert!(validate_file_name("holiday video.mp4").is_ok());
        assert!(validate_file_name(".hidden").is_ok());
        assert!(validate_file_name("archive.tar.gz").is_ok());
    }

    #[test]
    fn shard_size_bounds() {
        assert!(validate_shard_size(0).is_err());
        assert!(validate_shard_size(DEFAULT_SHARD_SIZE).is_ok());
        assert!(validate_shard_size(MAX_REMOTE_OBJECT_SIZE).is_err());
        assert!(validate_shard_size(MAX_REMOTE_OBJECT_SIZE - 28).is_ok());
    }

    #[test]
    fn record_errors_become_invalid_input() {
        let record = FileRecord {
            file_id: "f9".into(),
            file_name: "x".into(),
            file_size: 30,
            file_type: String::new(),
            encrypted: false,
            shard_size: 10,
            parts: vec![ShardHandle {
                sequence: 0,
                message_id: 1,
                remote_id: "r".into(),
            }],
            uploaded_at: Utc::now(),
            parent_id: None,
        };
        match validate_record(&record) {
            Err(TransferError::InvalidInput(msg)) => assert!(msg.contains("f9")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
