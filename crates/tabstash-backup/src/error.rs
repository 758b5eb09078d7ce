//! Backup error types

use tabstash_storage::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    /// The import was rejected as a whole; nothing was applied.
    #[error("Invalid backup: {0}")]
    Validation(String),

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] tabstash_storage::StorageError),

    #[error("Session error: {0}")]
    Session(#[from] tabstash_session::SessionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackupError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BackupError::Validation(_) => ErrorCode::ValidationFailed,
            BackupError::NotFound(_) => ErrorCode::NotFound,
            BackupError::Storage(e) => e.code(),
            BackupError::Session(e) => e.code(),
            BackupError::Serialization(_) => ErrorCode::Internal,
        }
    }
}
