//! Errors surfaced by the log manager (component 4.L).

use tlog_types::error::{ErrorCode, StorageError};

/// Failures from restoring, creating, or upgrading a log instance.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// `logId` was empty, contained `/`, `\`, or `.`, or exceeded 255 bytes.
    #[error("invalid log identifier: {0}")]
    InvalidLogId(String),
    /// No state row exists for this log and lazy restore cannot proceed.
    #[error("log not found")]
    LogNotFound,
    /// Creating a new log's state row failed.
    #[error("log creation failed: {0}")]
    LogCreationFailed(#[from] StorageError),
}

impl ErrorCode for ManagerError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidLogId(_) => "INVALID_SPACE_DID",
            Self::LogNotFound => "NOT_FOUND",
            Self::LogCreationFailed(_) => "LOG_CREATION_FAILED",
        }
    }
}

/// Validates a log/space identifier per spec §6: rejected if it contains
/// `/`, `\`, or `.`, is empty, or exceeds 255 bytes.
pub fn validate_log_id(space_id: &str) -> Result<(), ManagerError> {
    if space_id.is_empty() || space_id.len() > 255 {
        return Err(ManagerError::InvalidLogId(format!(
            "log id must be 1..=255 bytes, got {}",
            space_id.len()
        )));
    }
    if space_id.contains(['/', '\\', '.']) {
        return Err(ManagerError::InvalidLogId(
            "log id must not contain '/', '\\', or '.'".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_plain_identifier() {
        assert!(validate_log_id("did:key:zSpace").is_ok());
    }

    #[test]
    fn rejects_path_separators_and_dots() {
        assert!(validate_log_id("a/b").is_err());
        assert!(validate_log_id("a\\b").is_err());
        assert!(validate_log_id("a.b").is_err());
        assert!(validate_log_id("").is_err());
        assert!(validate_log_id(&"x".repeat(256)).is_err());
    }
}
