//! Sync Orchestrator
//!
//! Upload: sessions -> `BackupBlob` -> JSON -> AES-GCM -> remote blob.
//!
//! Download is two-phase. `fetch_preview` decrypts and validates the remote
//! snapshot without touching local state; only `confirm_apply` with the
//! current preview replaces local sessions. Any failure before the apply
//! leaves local sessions exactly as they were.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use tabstash_backup::{parse_import, BackupBlob, BackupManager, SCHEMA_VERSION};
use tabstash_session::{Session, SessionRepository};
use tabstash_undo::{UndoAction, UndoEngine, UndoEntry};

use crate::crypto::{EncryptionGateway, SyncIdentity};
use crate::error::SyncError;
use crate::remote::{RemoteBlobStore, UploadBlob};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Previewing,
    Applying,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub synced_at: String,
    pub session_count: usize,
}

/// A decrypted remote snapshot held in memory until the user confirms or
/// cancels. Only the most recently fetched preview can be applied.
#[derive(Debug)]
pub struct SyncPreview {
    generation: u64,
    sessions: Vec<Session>,
    remote_timestamp: String,
    schema_version: u32,
}

impl SyncPreview {
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn tab_count(&self) -> usize {
        self.sessions.iter().map(Session::tab_count).sum()
    }

    pub fn remote_timestamp(&self) -> &str {
        &self.remote_timestamp
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }
}

#[derive(Debug)]
pub enum PreviewOutcome {
    /// Nothing has been uploaded for this user yet.
    NotFound,
    Ready(SyncPreview),
}

#[derive(Debug, Clone)]
pub struct AppliedSync {
    pub restored: usize,
    /// Local sessions that were replaced, already captured for undo.
    pub replaced: Vec<Session>,
    pub remote_timestamp: String,
}

struct Machine {
    state: SyncState,
    generation: u64,
}

pub struct SyncOrchestrator {
    identity: SyncIdentity,
    gateway: EncryptionGateway,
    remote: Arc<dyn RemoteBlobStore>,
    repo: SessionRepository,
    backups: Arc<BackupManager>,
    undo: UndoEngine,
    machine: Mutex<Machine>,
}

impl SyncOrchestrator {
    /// Derives the encryption key once for `identity`.
    pub fn new(
        identity: SyncIdentity,
        remote: Arc<dyn RemoteBlobStore>,
        repo: SessionRepository,
        backups: Arc<BackupManager>,
        undo: UndoEngine,
    ) -> Self {
        let gateway = EncryptionGateway::derive(&identity);
        Self::with_gateway(identity, gateway, remote, repo, backups, undo)
    }

    pub fn with_gateway(
        identity: SyncIdentity,
        gateway: EncryptionGateway,
        remote: Arc<dyn RemoteBlobStore>,
        repo: SessionRepository,
        backups: Arc<BackupManager>,
        undo: UndoEngine,
    ) -> Self {
        Self {
            identity,
            gateway,
            remote,
            repo,
            backups,
            undo,
            machine: Mutex::new(Machine {
                state: SyncState::Idle,
                generation: 0,
            }),
        }
    }

    pub fn state(&self) -> SyncState {
        self.machine.lock().state
    }

    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    /// Encrypt every local session and overwrite the remote blob.
    pub async fn upload(&self) -> Result<UploadReceipt> {
        let sessions = self.repo.list()?;
        let session_count = sessions.len();
        let blob = BackupBlob::new(sessions, None);
        let plaintext = serde_json::to_vec(&blob)?;
        let payload = self.gateway.encrypt(&plaintext)?;

        let upload = UploadBlob {
            payload,
            schema_version: SCHEMA_VERSION,
            client_timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let receipt = self.remote.put(&self.identity.user_id, upload).await?;

        info!(
            sessions = session_count,
            synced_at = %receipt.synced_at,
            "Uploaded encrypted snapshot"
        );
        Ok(UploadReceipt {
            synced_at: receipt.synced_at,
            session_count,
        })
    }

    /// Fetch, decrypt and validate the remote snapshot. Never writes
    /// locally. A new preview supersedes any earlier one.
    pub async fn fetch_preview(&self) -> Result<PreviewOutcome> {
        let fetched = self.remote.get(&self.identity.user_id).await;
        let outcome = fetched.and_then(|remote| match remote {
            None => Ok(None),
            Some(remote) => {
                if remote.schema_version > SCHEMA_VERSION {
                    return Err(SyncError::Validation(format!(
                        "unsupported schema version {}",
                        remote.schema_version
                    )));
                }
                let plaintext = self.gateway.decrypt(&remote.payload)?;
                let text = String::from_utf8(plaintext)
                    .map_err(|_| SyncError::Validation("decrypted payload is not text".to_string()))?;
                let blob = parse_import(&text)?;
                Ok(Some((blob, remote.last_synced_at, remote.schema_version)))
            }
        });

        let mut machine = self.machine.lock();
        match outcome {
            Ok(None) => {
                machine.state = SyncState::Idle;
                debug!("No remote snapshot to preview");
                Ok(PreviewOutcome::NotFound)
            }
            Ok(Some((blob, remote_timestamp, schema_version))) => {
                machine.generation += 1;
                machine.state = SyncState::Previewing;
                info!(
                    sessions = blob.session_count(),
                    remote_timestamp = %remote_timestamp,
                    "Fetched sync preview"
                );
                Ok(PreviewOutcome::Ready(SyncPreview {
                    generation: machine.generation,
                    sessions: blob.sessions,
                    remote_timestamp,
                    schema_version,
                }))
            }
            Err(e) => {
                // Invalidate any preview fetched before this failure
                machine.generation += 1;
                machine.state = SyncState::Idle;
                warn!(code = %e.code(), "Sync preview failed: {}", e);
                Err(e)
            }
        }
    }

    /// Replace local sessions with the confirmed preview.
    ///
    /// A safety backup of the current sessions is taken first; if that
    /// fails, nothing is applied. The replaced sessions are pushed as one
    /// `Import` undo entry.
    pub fn confirm_apply(&self, preview: SyncPreview) -> Result<AppliedSync> {
        {
            let mut machine = self.machine.lock();
            if machine.state != SyncState::Previewing || machine.generation != preview.generation {
                return Err(SyncError::StalePreview);
            }
            machine.state = SyncState::Applying;
        }

        let result = self.apply(preview);
        self.machine.lock().state = match result {
            Ok(_) => SyncState::Done,
            Err(_) => SyncState::Idle,
        };
        result
    }

    fn apply(&self, preview: SyncPreview) -> Result<AppliedSync> {
        let safety_key = self.backups.create(None)?;
        debug!(backup = %safety_key, "Took safety backup before sync apply");

        let blob = BackupBlob::new(preview.sessions, None);
        let replaced = self.backups.restore(&blob)?;

        let entry = UndoEntry::new(UndoAction::Import {
            previous: replaced.clone(),
        });
        if let Err(e) = self.undo.push(entry) {
            warn!(code = %e.code(), "Sync apply kept without undo coverage: {}", e);
        }

        info!(
            restored = blob.session_count(),
            replaced = replaced.len(),
            "Applied remote snapshot"
        );
        Ok(AppliedSync {
            restored: blob.session_count(),
            replaced,
            remote_timestamp: preview.remote_timestamp,
        })
    }

    /// Discard `preview`. Cancelling a superseded preview is a no-op.
    pub fn cancel(&self, preview: SyncPreview) {
        let mut machine = self.machine.lock();
        if machine.state == SyncState::Previewing && machine.generation == preview.generation {
            machine.generation += 1;
            machine.state = SyncState::Idle;
            debug!("Sync preview cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryBlobStore;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use tabstash_session::CapturedTab;
    use tabstash_storage::{Database, ErrorCode};
    use tabstash_undo::ManualScheduler;

    struct Fixture {
        repo: SessionRepository,
        backups: Arc<BackupManager>,
        undo: UndoEngine,
        remote: Arc<InMemoryBlobStore>,
        sync: SyncOrchestrator,
    }

    fn gateway(secret: &str) -> EncryptionGateway {
        EncryptionGateway::derive_with_iterations(secret, 1_000)
    }

    fn setup_with_secret(secret: &str) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let repo = SessionRepository::new(db.clone());
        let backups = Arc::new(BackupManager::new(db.clone(), repo.clone()));
        let undo = UndoEngine::new(db, Arc::new(ManualScheduler::default()));
        let remote = Arc::new(InMemoryBlobStore::new());
        let sync = SyncOrchestrator::with_gateway(
            SyncIdentity::new("user-1", secret),
            gateway(secret),
            remote.clone(),
            repo.clone(),
            backups.clone(),
            undo.clone(),
        );
        Fixture {
            repo,
            backups,
            undo,
            remote,
            sync,
        }
    }

    fn setup() -> Fixture {
        setup_with_secret("correct horse")
    }

    fn tabs(n: usize) -> Vec<CapturedTab> {
        (0..n)
            .map(|i| CapturedTab::new(format!("Tab {i}"), format!("https://example.com/{i}")))
            .collect()
    }

    async fn ready(sync: &SyncOrchestrator) -> SyncPreview {
        match sync.fetch_preview().await.unwrap() {
            PreviewOutcome::Ready(preview) => preview,
            PreviewOutcome::NotFound => panic!("expected a preview"),
        }
    }

    #[tokio::test]
    async fn test_upload_stores_only_ciphertext() {
        let f = setup();
        f.repo.create("Research", tabs(3)).unwrap();

        let receipt = f.sync.upload().await.unwrap();
        assert_eq!(receipt.session_count, 1);

        let stored = f.remote.get("user-1").await.unwrap().unwrap();
        assert_eq!(stored.schema_version, SCHEMA_VERSION);
        assert!(!stored.payload.contains("Research"));
        assert!(stored.last_synced_at >= receipt.synced_at);
    }

    #[tokio::test]
    async fn test_preview_then_confirm() {
        let f = setup();
        let remote_session = f.repo.create("Remote", tabs(2)).unwrap();
        f.sync.upload().await.unwrap();

        f.repo.clear_all().unwrap();
        let local = f.repo.create("Local", tabs(1)).unwrap();

        let preview = ready(&f.sync).await;
        assert_eq!(f.sync.state(), SyncState::Previewing);
        assert_eq!(preview.session_count(), 1);
        assert_eq!(preview.tab_count(), 2);
        // Previewing never writes locally
        assert_eq!(f.repo.list().unwrap(), vec![local.clone()]);

        let applied = f.sync.confirm_apply(preview).unwrap();
        assert_eq!(applied.restored, 1);
        assert_eq!(applied.replaced, vec![local.clone()]);
        assert_eq!(f.sync.state(), SyncState::Done);
        assert_eq!(f.repo.list().unwrap(), vec![remote_session]);

        // Safety backup holds the replaced sessions
        assert_eq!(f.backups.latest().unwrap().unwrap().sessions, vec![local.clone()]);

        // And the apply is undoable
        f.undo.undo_last_action(&f.repo).unwrap().unwrap();
        assert_eq!(f.repo.list().unwrap(), vec![local]);
    }

    #[tokio::test]
    async fn test_tampered_payload_is_crypto_failure() {
        let f = setup();
        f.repo.create("Research", tabs(3)).unwrap();
        f.sync.upload().await.unwrap();

        let stored = f.remote.get("user-1").await.unwrap().unwrap();
        let mut raw = BASE64.decode(&stored.payload).unwrap();
        let middle = raw.len() / 2;
        raw[middle] ^= 0x01;
        f.remote
            .put(
                "user-1",
                UploadBlob {
                    payload: BASE64.encode(&raw),
                    schema_version: stored.schema_version,
                    client_timestamp: stored.last_synced_at.clone(),
                },
            )
            .await
            .unwrap();

        let before = f.repo.list().unwrap();
        let err = f.sync.fetch_preview().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CryptoFailure);
        assert_eq!(f.sync.state(), SyncState::Idle);
        assert_eq!(f.repo.list().unwrap(), before);
    }

    #[tokio::test]
    async fn test_wrong_key_is_crypto_failure() {
        let f = setup();
        f.repo.create("Research", tabs(1)).unwrap();
        f.sync.upload().await.unwrap();

        let rotated = SyncOrchestrator::with_gateway(
            SyncIdentity::new("user-1", "rotated"),
            gateway("rotated"),
            f.remote.clone(),
            f.repo.clone(),
            f.backups.clone(),
            f.undo.clone(),
        );
        let err = rotated.fetch_preview().await.unwrap_err();
        assert!(matches!(err, SyncError::Crypto(_)));
    }

    #[tokio::test]
    async fn test_not_found() {
        let f = setup();
        assert!(matches!(f.sync.fetch_preview().await.unwrap(), PreviewOutcome::NotFound));
        assert_eq!(f.sync.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_superseded_preview_is_stale() {
        let f = setup();
        f.repo.create("Remote", tabs(1)).unwrap();
        f.sync.upload().await.unwrap();
        f.repo.clear_all().unwrap();

        let first = ready(&f.sync).await;
        let second = ready(&f.sync).await;

        let err = f.sync.confirm_apply(first).unwrap_err();
        assert!(matches!(err, SyncError::StalePreview));
        assert_eq!(f.repo.count().unwrap(), 0);

        f.sync.confirm_apply(second).unwrap();
        assert_eq!(f.repo.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancel_returns_to_idle() {
        let f = setup();
        f.repo.create("Remote", tabs(1)).unwrap();
        f.sync.upload().await.unwrap();

        let preview = ready(&f.sync).await;
        f.sync.cancel(preview);
        assert_eq!(f.sync.state(), SyncState::Idle);
        assert_eq!(f.backups.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_newer_remote_schema_is_rejected() {
        let f = setup();
        let payload = f.sync.gateway.encrypt(b"{}").unwrap();
        f.remote
            .put(
                "user-1",
                UploadBlob {
                    payload,
                    schema_version: SCHEMA_VERSION + 1,
                    client_timestamp: "2026-01-01T00:00:00.000Z".to_string(),
                },
            )
            .await
            .unwrap();

        let err = f.sync.fetch_preview().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn test_remote_offline_leaves_local_untouched() {
        let f = setup();
        let local = f.repo.create("Local", tabs(1)).unwrap();
        f.remote.set_offline(true);

        let err = f.sync.upload().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RemoteUnavailable);
        let err = f.sync.fetch_preview().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RemoteUnavailable);
        assert_eq!(f.repo.list().unwrap(), vec![local]);
    }
}
