//! Storage error types

use rusqlite::ErrorCode as SqliteCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, payload-free error classification shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    CapacityExceeded,
    TransactionFailed,
    ValidationFailed,
    CryptoFailure,
    RemoteUnavailable,
    OpenFailed,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::CapacityExceeded => "CAPACITY_EXCEEDED",
            ErrorCode::TransactionFailed => "TRANSACTION_FAILED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::CryptoFailure => "CRYPTO_FAILURE",
            ErrorCode::RemoteUnavailable => "REMOTE_UNAVAILABLE",
            ErrorCode::OpenFailed => "OPEN_FAILED",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Storage quota exhausted; delete old sessions or backups to free space")]
    CapacityExceeded,

    #[error("Transaction aborted by concurrent access; retry the command")]
    TransactionFailed,

    #[error("Database error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("Record encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StorageError::Open(_) => ErrorCode::OpenFailed,
            StorageError::CapacityExceeded => ErrorCode::CapacityExceeded,
            StorageError::TransactionFailed => ErrorCode::TransactionFailed,
            StorageError::Sqlite(_) | StorageError::Serialization(_) => ErrorCode::Internal,
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(SqliteCode::DiskFull) => StorageError::CapacityExceeded,
            Some(SqliteCode::DatabaseBusy) | Some(SqliteCode::DatabaseLocked) => {
                StorageError::TransactionFailed
            }
            _ => StorageError::Sqlite(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_full_maps_to_capacity() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            None,
        );
        let mapped = StorageError::from(err);
        assert_eq!(mapped.code(), ErrorCode::CapacityExceeded);
    }

    #[test]
    fn test_busy_maps_to_transaction_failed() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert_eq!(StorageError::from(err).code(), ErrorCode::TransactionFailed);
    }

    #[test]
    fn test_code_strings_are_stable() {
        assert_eq!(ErrorCode::CryptoFailure.as_str(), "CRYPTO_FAILURE");
        assert_eq!(
            serde_json::to_string(&ErrorCode::NotFound).unwrap(),
            "\"NOT_FOUND\""
        );
    }
}
