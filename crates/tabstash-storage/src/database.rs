//! Database connection and operations

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use crate::collection::{Collection, CollectionTx};
use crate::error::StorageError;
use crate::migrations::run_migrations;
use crate::Result;

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            StorageError::Open(format!("{}: {}", path.display(), e))
        })?;

        // WAL mode for better concurrent performance
        let _: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| StorageError::Open(e.to_string()))?;

        run_migrations(&conn)?;

        tracing::debug!(path = %path.display(), "Opened durable store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StorageError::Open(e.to_string()))?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Run a read-only unit of work against one collection.
    pub fn read<F, T>(&self, collection: Collection, f: F) -> Result<T>
    where
        F: FnOnce(&CollectionTx<'_>) -> Result<T>,
    {
        self.transaction(|conn| f(&CollectionTx::new(conn, collection)))
    }

    /// Run an atomic write against one collection.
    ///
    /// Either every change made by `f` is committed or none is; errors
    /// returned by `f` roll the transaction back. Nothing is retried here.
    pub fn write<F, T>(&self, collection: Collection, f: F) -> Result<T>
    where
        F: FnOnce(&CollectionTx<'_>) -> Result<T>,
    {
        self.transaction(|conn| f(&CollectionTx::new(conn, collection)))
            .map_err(|e| {
                tracing::warn!(collection = %collection, code = %e.code(), "Collection write failed");
                e
            })
    }

    /// Cap the database size in pages. Writes beyond the cap fail with
    /// [`StorageError::CapacityExceeded`].
    pub fn set_max_page_count(&self, pages: u32) -> Result<u32> {
        self.with_connection(|conn| {
            let applied: u32 =
                conn.pragma_update_and_check(None, "max_page_count", pages, |row| row.get(0))?;
            Ok(applied)
        })
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            let value = conn
                .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value)
        })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let updated_at = Utc::now().to_rfc3339();
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![key, value, updated_at],
            )?;
            Ok(())
        })?;

        Ok(())
    }

    pub fn all_settings(&self) -> Result<Vec<(String, String)>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
            let settings = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<(String, String)>, _>>()?;
            Ok(settings)
        })
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}
