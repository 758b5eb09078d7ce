//! Session error types

use tabstash_storage::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session name cannot be empty")]
    EmptyName,

    #[error("Duplicate session id: {0}")]
    DuplicateId(String),

    #[error("Storage error: {0}")]
    Storage(#[from] tabstash_storage::StorageError),
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::NotFound(_) => ErrorCode::NotFound,
            SessionError::EmptyName | SessionError::DuplicateId(_) => ErrorCode::ValidationFailed,
            SessionError::Storage(e) => e.code(),
        }
    }
}
