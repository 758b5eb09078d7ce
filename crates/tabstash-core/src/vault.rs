//! Vault: the command layer
//!
//! Owns the database, repository, undo engine, backup manager and the
//! optional sync orchestrator. Mutating commands are serialized by
//! `command_lock`; each runs its primary write and then pushes one undo
//! entry. The two steps are separate transactions: if the push fails the
//! write is kept and that one command loses undo coverage.

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::sync::Arc;

use tabstash_backup::{BackupBlob, BackupManager, BackupSummary};
use tabstash_session::{CapturedTab, Group, Session, SessionPatch, SessionRepository};
use tabstash_storage::Database;
use tabstash_sync::{
    AppliedSync, HttpBlobStore, PreviewOutcome, RemoteBlobStore, SyncIdentity, SyncOrchestrator,
    SyncPreview, UploadReceipt,
};
use tabstash_undo::{Scheduler, UndoAction, UndoEngine, UndoEntry};

use crate::capture::{CaptureScope, TabCapture};
use crate::config::Config;
use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub imported: usize,
    pub replaced: usize,
    /// Key of the safety backup taken before replacing
    pub safety_backup: String,
}

pub struct Vault {
    config: Config,
    db: Database,
    repo: SessionRepository,
    undo: UndoEngine,
    backups: Arc<BackupManager>,
    sync: RwLock<Option<Arc<SyncOrchestrator>>>,
    command_lock: Mutex<()>,
}

impl Vault {
    /// Open (or create) the vault at `config.database_path`.
    pub fn open(config: Config, scheduler: Arc<dyn Scheduler>) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&config.database_path)?;
        Self::with_database(config, db, scheduler)
    }

    pub fn with_database(config: Config, db: Database, scheduler: Arc<dyn Scheduler>) -> Result<Self> {
        if let Some(pages) = config.max_page_count {
            db.set_max_page_count(pages)?;
        }

        let repo = SessionRepository::new(db.clone());
        let undo = UndoEngine::with_debounce(db.clone(), scheduler, config.undo_debounce());
        let backups = Arc::new(BackupManager::new(db.clone(), repo.clone()));

        Ok(Self {
            config,
            db,
            repo,
            undo,
            backups,
            sync: RwLock::new(None),
            command_lock: Mutex::new(()),
        })
    }

    /// Rehydrate the undo stack now instead of on first use.
    pub fn initialize(&self) -> Result<()> {
        self.undo.initialize()?;
        tracing::info!(sessions = self.repo.count()?, "Vault initialized");
        Ok(())
    }

    fn record(&self, action: UndoAction) {
        let kind = action.kind();
        if let Err(e) = self.undo.push(UndoEntry::new(action)) {
            tracing::warn!(action = kind, code = %e.code(), "Undo entry dropped: {}", e);
        }
    }

    // === Session commands ===

    pub fn save_session(&self, name: &str, tabs: Vec<CapturedTab>) -> Result<Session> {
        let _command = self.command_lock.lock();
        let session = self.repo.create(name, tabs)?;
        self.record(UndoAction::SaveSession {
            session_id: session.id.clone(),
        });
        Ok(session)
    }

    /// Capture tabs from the host and save them as a new session.
    pub fn save_captured(
        &self,
        name: &str,
        capture: &dyn TabCapture,
        scope: CaptureScope,
    ) -> Result<Session> {
        let tabs = capture.capture(scope)?;
        tracing::debug!(?scope, tabs = tabs.len(), "Captured tabs");
        self.save_session(name, tabs)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<Session> {
        let _command = self.command_lock.lock();
        let session = self
            .repo
            .delete(session_id)?
            .ok_or_else(|| CoreError::NotFound(session_id.to_string()))?;
        self.record(UndoAction::DeleteSession {
            session: session.clone(),
        });
        Ok(session)
    }

    pub fn rename_session(&self, session_id: &str, new_name: &str) -> Result<Session> {
        let _command = self.command_lock.lock();
        let old_name = self.repo.require(session_id)?.name;
        let session = self.repo.update(session_id, SessionPatch::rename(new_name))?;
        self.record(UndoAction::RenameSession {
            session_id: session.id.clone(),
            old_name,
            new_name: session.name.clone(),
        });
        Ok(session)
    }

    /// Replace a session's groups, e.g. with a suggested grouping.
    pub fn apply_grouping(&self, session_id: &str, groups: Vec<Group>) -> Result<Session> {
        let _command = self.command_lock.lock();
        let previous = self.repo.replace_groups(session_id, groups)?;
        let session = self.repo.require(session_id)?;
        self.record(UndoAction::ApplyGrouping { previous });
        Ok(session)
    }

    /// Delete every session. Returns how many were removed.
    pub fn clear_all(&self) -> Result<usize> {
        let _command = self.command_lock.lock();
        let previous = self.repo.clear_all()?;
        let removed = previous.len();
        self.record(UndoAction::ClearAll { previous });
        Ok(removed)
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.repo.list()?)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session> {
        self.repo
            .get(session_id)?
            .ok_or_else(|| CoreError::NotFound(session_id.to_string()))
    }

    // === Import / export / backups ===

    /// Validate `text` and replace every session with its contents.
    ///
    /// Rejected imports change nothing. Accepted imports are preceded by a
    /// safety backup of the current sessions.
    pub fn import(&self, text: &str) -> Result<ImportReport> {
        let blob = self.backups.parse_import(text)?;
        let _command = self.command_lock.lock();
        self.replace_with(&blob)
    }

    pub fn restore_backup(&self, key: &str) -> Result<ImportReport> {
        let blob = self.backups.get(key)?;
        let _command = self.command_lock.lock();
        self.replace_with(&blob)
    }

    fn replace_with(&self, blob: &BackupBlob) -> Result<ImportReport> {
        let safety_backup = self.backups.create(None)?;
        let previous = self.backups.restore(blob)?;
        let report = ImportReport {
            imported: blob.session_count(),
            replaced: previous.len(),
            safety_backup,
        };
        self.record(UndoAction::Import { previous });

        tracing::info!(
            imported = report.imported,
            replaced = report.replaced,
            "Replaced sessions from snapshot"
        );
        Ok(report)
    }

    /// Portable text of every session. Without explicit `settings`, the
    /// stored settings are included.
    pub fn export(&self, settings: Option<Value>) -> Result<String> {
        let settings = match settings {
            Some(settings) => Some(settings),
            None => self.stored_settings()?,
        };
        Ok(self.backups.export(settings)?)
    }

    fn stored_settings(&self) -> Result<Option<Value>> {
        let settings = self.db.all_settings()?;
        if settings.is_empty() {
            return Ok(None);
        }
        let map: Map<String, Value> = settings
            .into_iter()
            .map(|(key, raw)| {
                let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                (key, value)
            })
            .collect();
        Ok(Some(Value::Object(map)))
    }

    pub fn create_backup(&self) -> Result<String> {
        let _command = self.command_lock.lock();
        Ok(self.backups.create(None)?)
    }

    pub fn list_backups(&self) -> Result<Vec<BackupSummary>> {
        Ok(self.backups.list()?)
    }

    // === Undo ===

    /// Reverse the most recent command. `None` when there is nothing to undo.
    pub fn undo_last_action(&self) -> Result<Option<UndoEntry>> {
        let _command = self.command_lock.lock();
        Ok(self.undo.undo_last_action(&self.repo)?)
    }

    pub fn undo_entries(&self) -> Result<Vec<UndoEntry>> {
        Ok(self.undo.entries()?)
    }

    /// Write the undo stack to disk now.
    pub fn flush(&self) -> Result<()> {
        Ok(self.undo.flush()?)
    }

    /// Host hint that the process may be suspended or killed.
    pub fn on_suspend(&self) -> Result<()> {
        tracing::info!("Suspend signalled, flushing undo stack");
        self.flush()
    }

    // === Sync ===

    pub fn enable_sync(&self, identity: SyncIdentity, remote: Arc<dyn RemoteBlobStore>) {
        let orchestrator = SyncOrchestrator::new(
            identity,
            remote,
            self.repo.clone(),
            self.backups.clone(),
            self.undo.clone(),
        );
        tracing::info!(user_id = %orchestrator.user_id(), "Sync enabled");
        *self.sync.write() = Some(Arc::new(orchestrator));
    }

    /// Enable sync against the configured HTTP endpoint.
    pub fn enable_http_sync(&self, identity: SyncIdentity, api_token: &str) -> Result<()> {
        let endpoint = self
            .config
            .sync_endpoint
            .clone()
            .ok_or_else(|| CoreError::Config("sync_endpoint is not set".to_string()))?;
        let remote = HttpBlobStore::new(&endpoint, api_token)?;
        self.enable_sync(identity, Arc::new(remote));
        Ok(())
    }

    pub fn disable_sync(&self) {
        *self.sync.write() = None;
        tracing::info!("Sync disabled");
    }

    fn sync(&self) -> Result<Arc<SyncOrchestrator>> {
        self.sync.read().clone().ok_or(CoreError::SyncNotConfigured)
    }

    pub async fn upload(&self) -> Result<UploadReceipt> {
        let sync = self.sync()?;
        Ok(sync.upload().await?)
    }

    pub async fn fetch_sync_preview(&self) -> Result<PreviewOutcome> {
        let sync = self.sync()?;
        Ok(sync.fetch_preview().await?)
    }

    pub fn confirm_sync_apply(&self, preview: SyncPreview) -> Result<AppliedSync> {
        let sync = self.sync()?;
        let _command = self.command_lock.lock();
        Ok(sync.confirm_apply(preview)?)
    }

    pub fn cancel_sync_preview(&self, preview: SyncPreview) -> Result<()> {
        self.sync()?.cancel(preview);
        Ok(())
    }

    // === Settings ===

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.db.get_setting(key)?)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.db.set_setting(key, value)?;
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl Drop for Vault {
    fn drop(&mut self) {
        if let Err(e) = self.undo.flush() {
            tracing::warn!(code = %e.code(), "Failed to flush undo stack on close: {}", e);
        }
    }
}
