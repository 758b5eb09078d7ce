//! Sync error types

use tabstash_storage::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Wrong or rotated key, or corrupted/tampered ciphertext.
    #[error("Remote data unreadable: {0}")]
    Crypto(&'static str),

    #[error("Remote sync unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Invalid remote data: {0}")]
    Validation(String),

    #[error("Preview is no longer current; fetch a new one")]
    StalePreview,

    #[error("Backup error: {0}")]
    Backup(#[from] tabstash_backup::BackupError),

    #[error("Session error: {0}")]
    Session(#[from] tabstash_session::SessionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::Crypto(_) => ErrorCode::CryptoFailure,
            SyncError::RemoteUnavailable(_) => ErrorCode::RemoteUnavailable,
            SyncError::Validation(_) | SyncError::StalePreview => ErrorCode::ValidationFailed,
            SyncError::Backup(e) => e.code(),
            SyncError::Session(e) => e.code(),
            SyncError::Serialization(_) => ErrorCode::Internal,
        }
    }
}
