//! Tabstash Core
//!
//! Command layer for the tab-session vault. Every mutating command runs
//! under one lock and records exactly one undo entry.

mod capture;
mod config;
mod error;
mod vault;

pub use capture::{CaptureScope, TabCapture};
pub use config::Config;
pub use error::CoreError;
pub use vault::{ImportReport, Vault};

// Re-export the layers
pub use tabstash_backup::{BackupBlob, BackupError, BackupManager, BackupSummary, MAX_BACKUPS};
pub use tabstash_session::{
    CapturedTab, Group, Session, SessionError, SessionPatch, SessionRepository, TabSnapshot,
};
pub use tabstash_storage::{Database, ErrorCode, StorageError};
pub use tabstash_sync::{
    AppliedSync, HttpBlobStore, InMemoryBlobStore, PreviewOutcome, RemoteBlobStore, SyncError,
    SyncIdentity, SyncOrchestrator, SyncPreview, SyncState, UploadBlob, UploadReceipt,
};
pub use tabstash_undo::{
    ManualScheduler, Scheduler, TokioScheduler, UndoAction, UndoEngine, UndoEntry, UndoError,
    MAX_UNDO_DEPTH,
};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
