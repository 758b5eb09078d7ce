//! Undo error types

use tabstash_storage::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UndoError {
    #[error("An undo is already in progress")]
    Busy,

    #[error("Storage error: {0}")]
    Storage(#[from] tabstash_storage::StorageError),

    #[error("Session error: {0}")]
    Session(#[from] tabstash_session::SessionError),
}

impl UndoError {
    pub fn code(&self) -> ErrorCode {
        match self {
            UndoError::Busy => ErrorCode::TransactionFailed,
            UndoError::Storage(e) => e.code(),
            UndoError::Session(e) => e.code(),
        }
    }
}
