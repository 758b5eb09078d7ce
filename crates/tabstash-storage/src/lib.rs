//! Tabstash Storage Layer
//!
//! SQLite-backed durable store exposing three independent collections
//! (sessions, undo entries, backups). Every write runs inside a transaction
//! scoped to exactly one collection.

mod collection;
mod database;
mod error;
mod migrations;

pub use collection::{Collection, CollectionTx, Order, Record};
pub use database::Database;
pub use error::{ErrorCode, StorageError};

pub type Result<T> = std::result::Result<T, StorageError>;
