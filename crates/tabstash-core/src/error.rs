//! Core error types

use tabstash_storage::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] tabstash_storage::StorageError),

    #[error("Session error: {0}")]
    Session(#[from] tabstash_session::SessionError),

    #[error("Undo error: {0}")]
    Undo(#[from] tabstash_undo::UndoError),

    #[error("Backup error: {0}")]
    Backup(#[from] tabstash_backup::BackupError),

    #[error("Sync error: {0}")]
    Sync(#[from] tabstash_sync::SyncError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tab capture failed: {0}")]
    Capture(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Sync is not configured")]
    SyncNotConfigured,
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Storage(e) => e.code(),
            CoreError::Session(e) => e.code(),
            CoreError::Undo(e) => e.code(),
            CoreError::Backup(e) => e.code(),
            CoreError::Sync(e) => e.code(),
            CoreError::Serialization(_) | CoreError::Config(_) | CoreError::Capture(_) => {
                ErrorCode::Internal
            }
            CoreError::NotFound(_) => ErrorCode::NotFound,
            CoreError::SyncNotConfigured => ErrorCode::RemoteUnavailable,
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}
