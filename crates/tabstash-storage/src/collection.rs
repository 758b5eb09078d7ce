//! Collection-scoped access inside a single transaction

use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::Result;

/// The independent collections held by the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Saved sessions, keyed by session id, ordered by `createdAt`
    Sessions,
    /// Undo entries, auto-keyed, insertion order is recency
    UndoStack,
    /// Backup snapshots, keyed by ISO-8601 timestamp
    Backups,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Sessions,
        Collection::UndoStack,
        Collection::Backups,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            Collection::Sessions => "sessions",
            Collection::UndoStack => "undo_stack",
            Collection::Backups => "backups",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.table_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

impl Order {
    fn sql(&self) -> &'static str {
        match self {
            Order::Ascending => "ORDER BY sort_key ASC, seq ASC",
            Order::Descending => "ORDER BY sort_key DESC, seq DESC",
        }
    }
}

/// A decoded row of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<T> {
    pub key: String,
    pub sort_key: i64,
    pub value: T,
}

/// Handle to one collection within an open transaction.
///
/// Obtained through [`crate::Database::read`] or [`crate::Database::write`];
/// it cannot outlive the transaction that produced it.
pub struct CollectionTx<'a> {
    conn: &'a Connection,
    collection: Collection,
}

impl<'a> CollectionTx<'a> {
    pub(crate) fn new(conn: &'a Connection, collection: Collection) -> Self {
        Self { conn, collection }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    fn table(&self) -> &'static str {
        self.collection.table_name()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", self.table()),
                [key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT seq FROM {} WHERE key = ?1", self.table()),
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert or overwrite the value stored under `key`.
    ///
    /// Overwriting keeps the original insertion position.
    pub fn put<T: Serialize>(&self, key: &str, sort_key: i64, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.conn.execute(
            &format!(
                "INSERT INTO {} (key, sort_key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET sort_key = excluded.sort_key, value = excluded.value",
                self.table()
            ),
            rusqlite::params![key, sort_key, json],
        )?;
        Ok(())
    }

    /// Append a value under a generated key, returning the key.
    pub fn append<T: Serialize>(&self, value: &T) -> Result<String> {
        let key = Uuid::new_v4().to_string();
        let json = serde_json::to_string(value)?;
        self.conn.execute(
            &format!(
                "INSERT INTO {} (key, sort_key, value) VALUES (?1, 0, ?2)",
                self.table()
            ),
            rusqlite::params![key, json],
        )?;
        Ok(key)
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.conn.execute(
            &format!("DELETE FROM {} WHERE key = ?1", self.table()),
            [key],
        )?;
        Ok(removed > 0)
    }

    pub fn records<T: DeserializeOwned>(&self, order: Order) -> Result<Vec<Record<T>>> {
        let mut records = Vec::new();
        for (key, sort_key, json) in self.raw_rows(order)? {
            records.push(Record {
                key,
                sort_key,
                value: serde_json::from_str(&json)?,
            });
        }
        Ok(records)
    }

    pub fn get_all<T: DeserializeOwned>(&self, order: Order) -> Result<Vec<T>> {
        Ok(self
            .records(order)?
            .into_iter()
            .map(|record| record.value)
            .collect())
    }

    /// Visit records in order until the callback returns `false`.
    pub fn for_each<T, F>(&self, order: Order, mut f: F) -> Result<()>
    where
        T: DeserializeOwned,
        F: FnMut(Record<T>) -> bool,
    {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT key, sort_key, value FROM {} {}",
            self.table(),
            order.sql()
        ))?;
        let mut rows = stmt.query([])?;

        while let Some(row) = rows.next()? {
            let json: String = row.get(2)?;
            let record = Record {
                key: row.get(0)?,
                sort_key: row.get(1)?,
                value: serde_json::from_str(&json)?,
            };
            if !f(record) {
                break;
            }
        }
        Ok(())
    }

    pub fn keys(&self, order: Order) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT key FROM {} {}",
            self.table(),
            order.sql()
        ))?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Remove every record, returning how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let removed = self
            .conn
            .execute(&format!("DELETE FROM {}", self.table()), [])?;
        Ok(removed)
    }

    fn raw_rows(&self, order: Order) -> Result<Vec<(String, i64, String)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT key, sort_key, value FROM {} {}",
            self.table(),
            order.sql()
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
