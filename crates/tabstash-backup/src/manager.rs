//! Backup Manager
//!
//! Creates timestamped snapshots in the `backups` collection, prunes them to
//! [`MAX_BACKUPS`], and restores a snapshot over the session collection.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tabstash_session::{Session, SessionRepository};
use tabstash_storage::{Collection, Database, Order, Record};

use crate::blob::{export_text, parse_import, BackupBlob, MAX_BACKUPS};
use crate::error::BackupError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub key: String,
    pub session_count: usize,
    pub tab_count: usize,
}

fn iso_key(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct BackupManager {
    db: Database,
    repo: SessionRepository,
    /// Millis of the last key handed out, so keys strictly increase
    last_key: Mutex<i64>,
}

impl BackupManager {
    pub fn new(db: Database, repo: SessionRepository) -> Self {
        Self {
            db,
            repo,
            last_key: Mutex::new(0),
        }
    }

    /// Snapshot `sessions` (or the current collection) and prune the oldest
    /// backups beyond [`MAX_BACKUPS`] in the same transaction.
    pub fn create(&self, sessions: Option<Vec<Session>>) -> Result<String> {
        let sessions = match sessions {
            Some(sessions) => sessions,
            None => self.repo.list()?,
        };
        let mut blob = BackupBlob::new(sessions, None);

        let mut last_key = self.last_key.lock();
        let candidate = Utc::now().timestamp_millis().max(*last_key + 1);

        let (key, millis, pruned) = self.db.write(Collection::Backups, |tx| {
            // Stay ahead of every stored key, even ones stamped by a clock
            // that was ahead of ours, so pruning never takes the new backup
            let mut newest = None;
            tx.for_each(Order::Descending, |record: Record<Value>| {
                newest = Some(record.sort_key);
                false
            })?;
            let mut millis = newest.map_or(candidate, |newest: i64| candidate.max(newest + 1));
            while tx.contains(&iso_key(millis))? {
                millis += 1;
            }
            let key = iso_key(millis);
            blob.timestamp = key.clone();
            tx.put(&key, millis, &blob)?;

            let overflow = tx.count()?.saturating_sub(MAX_BACKUPS);
            let stale: Vec<String> = tx.keys(Order::Ascending)?.into_iter().take(overflow).collect();
            for old in &stale {
                tx.delete(old)?;
            }
            Ok((key, millis, stale.len()))
        })?;
        *last_key = millis;

        tracing::info!(
            backup = %key,
            sessions = blob.session_count(),
            pruned,
            "Created backup"
        );
        Ok(key)
    }

    /// Stored backups, newest first.
    pub fn list(&self) -> Result<Vec<BackupSummary>> {
        let records = self
            .db
            .read(Collection::Backups, |tx| tx.records::<BackupBlob>(Order::Descending))?;
        Ok(records
            .into_iter()
            .map(|record| BackupSummary {
                session_count: record.value.session_count(),
                tab_count: record.value.tab_count(),
                key: record.key,
            })
            .collect())
    }

    pub fn get(&self, key: &str) -> Result<BackupBlob> {
        self.db
            .read(Collection::Backups, |tx| tx.get(key))?
            .ok_or_else(|| BackupError::NotFound(key.to_string()))
    }

    pub fn latest(&self) -> Result<Option<BackupBlob>> {
        let mut latest = None;
        self.db.read(Collection::Backups, |tx| {
            tx.for_each(Order::Descending, |record: Record<BackupBlob>| {
                latest = Some(record.value);
                false
            })
        })?;
        Ok(latest)
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.db.write(Collection::Backups, |tx| tx.delete(key))?)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.db.read(Collection::Backups, |tx| tx.count())?)
    }

    /// Serialize every session plus optional settings to portable text.
    pub fn export(&self, settings: Option<Value>) -> Result<String> {
        let blob = BackupBlob::new(self.repo.list()?, settings);
        let text = export_text(&blob)?;
        tracing::info!(sessions = blob.session_count(), "Exported sessions");
        Ok(text)
    }

    pub fn parse_import(&self, text: &str) -> Result<BackupBlob> {
        parse_import(text)
    }

    /// Replace the session collection with `blob.sessions` in one
    /// transaction, returning the prior sessions for undo capture.
    pub fn restore(&self, blob: &BackupBlob) -> Result<Vec<Session>> {
        Ok(self.repo.replace_all(&blob.sessions)?)
    }
}
