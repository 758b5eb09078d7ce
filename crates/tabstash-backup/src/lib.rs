//! Tabstash Backups
//!
//! Full snapshots of the session collection, kept as a bounded ring of
//! timestamped backups and exchanged as portable JSON text.

mod blob;
mod error;
mod manager;

pub use blob::{export_text, parse_import, BackupBlob, MAX_BACKUPS, SCHEMA_VERSION};
pub use error::BackupError;
pub use manager::{BackupManager, BackupSummary};

pub type Result<T> = std::result::Result<T, BackupError>;
