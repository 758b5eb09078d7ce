//! Undo Engine
//!
//! Lifecycle: `Uninitialized -> Loading -> Ready`. The first call that
//! touches the stack replaces the in-memory cache with whatever the durable
//! store holds. Mutations update memory immediately and schedule one
//! debounced persist; `flush()` is the only synchronous path to disk.
//!
//! Anything mutated inside the debounce window is lost if the process dies
//! before the timer fires or `flush()` runs; the stack then reverts to its
//! last persisted state.

use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tabstash_session::{SessionPatch, SessionRepository};
use tabstash_storage::{Collection, Database, Order};

use crate::entry::{UndoAction, UndoEntry, MAX_UNDO_DEPTH};
use crate::error::UndoError;
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::Result;

pub const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoPhase {
    Uninitialized,
    Loading,
    Ready,
}

struct UndoState {
    phase: UndoPhase,
    /// Oldest first
    entries: Vec<UndoEntry>,
}

struct UndoInner {
    db: Database,
    state: Mutex<UndoState>,
    pending: Mutex<Option<ScheduledTask>>,
    /// Serializes writers so an older snapshot never lands after a newer one
    persist_lock: Mutex<()>,
    scheduler: Arc<dyn Scheduler>,
    debounce: Duration,
    reverting: AtomicBool,
}

impl UndoInner {
    fn persist(&self) -> Result<()> {
        let _writer = self.persist_lock.lock();

        let entries = {
            let state = self.state.lock();
            if state.phase != UndoPhase::Ready {
                // Never overwrite the durable copy with a cache that was not loaded
                return Ok(());
            }
            state.entries.clone()
        };

        self.db.write(Collection::UndoStack, |tx| {
            tx.clear()?;
            for entry in &entries {
                tx.append(entry)?;
            }
            Ok(())
        })?;

        tracing::debug!(depth = entries.len(), "Persisted undo stack");
        Ok(())
    }
}

/// Clears the re-entrancy flag when an undo dispatch ends, including on error.
struct RevertGuard<'a>(&'a AtomicBool);

impl Drop for RevertGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Shared handle to the process-wide undo stack.
///
/// Clones share the same cache, timer and store.
#[derive(Clone)]
pub struct UndoEngine {
    inner: Arc<UndoInner>,
}

impl UndoEngine {
    pub fn new(db: Database, scheduler: Arc<dyn Scheduler>) -> Self {
        Self::with_debounce(db, scheduler, DEFAULT_PERSIST_DEBOUNCE)
    }

    pub fn with_debounce(db: Database, scheduler: Arc<dyn Scheduler>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(UndoInner {
                db,
                state: Mutex::new(UndoState {
                    phase: UndoPhase::Uninitialized,
                    entries: Vec::new(),
                }),
                pending: Mutex::new(None),
                persist_lock: Mutex::new(()),
                scheduler,
                debounce,
                reverting: AtomicBool::new(false),
            }),
        }
    }

    pub fn phase(&self) -> UndoPhase {
        self.inner.state.lock().phase
    }

    /// Load the stack from the durable store. Safe to call repeatedly; only
    /// the first successful call reads from disk.
    pub fn initialize(&self) -> Result<()> {
        self.ready_state().map(|_| ())
    }

    fn ready_state(&self) -> Result<MutexGuard<'_, UndoState>> {
        let mut state = self.inner.state.lock();
        if state.phase == UndoPhase::Ready {
            return Ok(state);
        }

        state.phase = UndoPhase::Loading;
        match self.load_entries() {
            Ok(entries) => {
                tracing::debug!(depth = entries.len(), "Rehydrated undo stack");
                state.entries = entries;
                state.phase = UndoPhase::Ready;
                Ok(state)
            }
            Err(e) => {
                state.phase = UndoPhase::Uninitialized;
                Err(e)
            }
        }
    }

    fn load_entries(&self) -> Result<Vec<UndoEntry>> {
        let records = self.inner.db.read(Collection::UndoStack, |tx| {
            tx.records::<serde_json::Value>(Order::Ascending)
        })?;

        let mut entries: Vec<UndoEntry> = records
            .into_iter()
            .filter_map(|record| match serde_json::from_value(record.value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(key = %record.key, error = %e, "Skipping unreadable undo entry");
                    None
                }
            })
            .collect();

        truncate_to_depth(&mut entries);
        Ok(entries)
    }

    pub fn push(&self, entry: UndoEntry) -> Result<()> {
        {
            let mut state = self.ready_state()?;
            tracing::debug!(kind = entry.action.kind(), "Pushed undo entry");
            state.entries.push(entry);
            truncate_to_depth(&mut state.entries);
        }
        self.schedule_persist();
        Ok(())
    }

    /// Remove and return the newest entry. Returns immediately; the durable
    /// copy catches up on the next debounced persist.
    pub fn pop(&self) -> Result<Option<UndoEntry>> {
        let popped = self.ready_state()?.entries.pop();
        if popped.is_some() {
            self.schedule_persist();
        }
        Ok(popped)
    }

    pub fn peek(&self) -> Result<Option<UndoEntry>> {
        Ok(self.ready_state()?.entries.last().cloned())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.ready_state()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of the stack, oldest first.
    pub fn entries(&self) -> Result<Vec<UndoEntry>> {
        Ok(self.ready_state()?.entries.clone())
    }

    pub fn clear(&self) -> Result<()> {
        self.ready_state()?.entries.clear();
        self.schedule_persist();
        Ok(())
    }

    pub fn has_pending_persist(&self) -> bool {
        self.inner
            .pending
            .lock()
            .as_ref()
            .is_some_and(ScheduledTask::is_pending)
    }

    /// Cancel any pending debounce and write the stack now.
    ///
    /// Call whenever the host signals possible termination. Such signals are
    /// best effort; when they do not arrive, unflushed changes are lost.
    pub fn flush(&self) -> Result<()> {
        if let Some(task) = self.inner.pending.lock().take() {
            task.cancel();
        }
        self.inner.persist()
    }

    fn schedule_persist(&self) {
        let mut pending = self.inner.pending.lock();
        if let Some(previous) = pending.take() {
            previous.cancel();
        }

        let weak: Weak<UndoInner> = Arc::downgrade(&self.inner);
        let task = self.inner.scheduler.schedule(
            self.inner.debounce,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    if let Err(e) = inner.persist() {
                        tracing::warn!(code = %e.code(), "Debounced undo persist failed: {}", e);
                    }
                }
            }),
        );
        *pending = Some(task);
    }

    /// Pop the newest entry and reverse it against the repository.
    ///
    /// Returns the reversed entry, or `None` when the stack is empty. A
    /// concurrent second call fails with [`UndoError::Busy`] instead of
    /// popping. An entry whose reversal fails stays popped.
    pub fn undo_last_action(&self, repo: &SessionRepository) -> Result<Option<UndoEntry>> {
        if self
            .inner
            .reverting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(UndoError::Busy);
        }
        let _guard = RevertGuard(&self.inner.reverting);

        let Some(entry) = self.pop()? else {
            return Ok(None);
        };

        revert(&entry.action, repo)?;
        tracing::info!(kind = entry.action.kind(), "Reverted action");

        Ok(Some(entry))
    }
}

fn truncate_to_depth(entries: &mut Vec<UndoEntry>) {
    if entries.len() > MAX_UNDO_DEPTH {
        let overflow = entries.len() - MAX_UNDO_DEPTH;
        entries.drain(0..overflow);
    }
}

fn revert(action: &UndoAction, repo: &SessionRepository) -> Result<()> {
    match action {
        UndoAction::SaveSession { session_id } => {
            if repo.delete(session_id)?.is_none() {
                tracing::warn!(session_id = %session_id, "Saved session already gone");
            }
        }
        UndoAction::DeleteSession { session } => {
            repo.insert(session)?;
        }
        UndoAction::RenameSession {
            session_id,
            old_name,
            ..
        } => {
            repo.update(session_id, SessionPatch::rename(old_name.clone()))?;
        }
        UndoAction::ApplyGrouping { previous } => {
            repo.insert(previous)?;
        }
        UndoAction::Import { previous } | UndoAction::ClearAll { previous } => {
            repo.replace_all(previous)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use tabstash_session::{CapturedTab, Group, Session};

    struct Fixture {
        db: Database,
        scheduler: Arc<ManualScheduler>,
        engine: UndoEngine,
        repo: SessionRepository,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        fixture_on(db)
    }

    fn fixture_on(db: Database) -> Fixture {
        let scheduler = Arc::new(ManualScheduler::new());
        let engine = UndoEngine::new(db.clone(), scheduler.clone());
        let repo = SessionRepository::new(db.clone());
        Fixture {
            db,
            scheduler,
            engine,
            repo,
        }
    }

    fn save_entry(n: usize) -> UndoEntry {
        UndoEntry::new(UndoAction::SaveSession {
            session_id: format!("s{n}"),
        })
    }

    fn stored_count(db: &Database) -> usize {
        db.read(Collection::UndoStack, |tx| tx.count()).unwrap()
    }

    fn tabs(n: usize) -> Vec<CapturedTab> {
        (0..n)
            .map(|i| CapturedTab::new(format!("Tab {i}"), format!("https://example.com/{i}")))
            .collect()
    }

    #[test]
    fn test_lazy_initialization() {
        let f = fixture();
        assert_eq!(f.engine.phase(), UndoPhase::Uninitialized);
        assert_eq!(f.engine.len().unwrap(), 0);
        assert_eq!(f.engine.phase(), UndoPhase::Ready);
    }

    #[test]
    fn test_depth_is_bounded_and_pops_reverse_order() {
        let f = fixture();
        for n in 0..15 {
            f.engine.push(save_entry(n)).unwrap();
            assert_eq!(f.engine.len().unwrap(), (n + 1).min(MAX_UNDO_DEPTH));
        }

        let mut popped = Vec::new();
        while let Some(entry) = f.engine.pop().unwrap() {
            if let UndoAction::SaveSession { session_id } = entry.action {
                popped.push(session_id);
            }
        }
        let expected: Vec<String> = (5..15).rev().map(|n| format!("s{n}")).collect();
        assert_eq!(popped, expected);
    }

    #[test]
    fn test_pushes_coalesce_into_one_persist() {
        let f = fixture();
        for n in 0..3 {
            f.engine.push(save_entry(n)).unwrap();
        }

        assert_eq!(f.scheduler.pending(), 1);
        assert_eq!(stored_count(&f.db), 0);

        assert_eq!(f.scheduler.advance(DEFAULT_PERSIST_DEBOUNCE), 1);
        assert_eq!(stored_count(&f.db), 3);
        assert!(!f.engine.has_pending_persist());
    }

    #[test]
    fn test_debounce_restarts_on_each_push() {
        let f = fixture();
        f.engine.push(save_entry(0)).unwrap();
        f.scheduler.advance(Duration::from_millis(400));
        f.engine.push(save_entry(1)).unwrap();
        f.scheduler.advance(Duration::from_millis(400));
        assert_eq!(stored_count(&f.db), 0);

        f.scheduler.advance(Duration::from_millis(100));
        assert_eq!(stored_count(&f.db), 2);
    }

    #[test]
    fn test_pop_returns_before_persisting() {
        let f = fixture();
        f.engine.push(save_entry(0)).unwrap();
        f.engine.flush().unwrap();

        assert!(f.engine.pop().unwrap().is_some());
        assert_eq!(stored_count(&f.db), 1);

        f.scheduler.advance(DEFAULT_PERSIST_DEBOUNCE);
        assert_eq!(stored_count(&f.db), 0);
    }

    #[test]
    fn test_flush_cancels_timer_and_writes() {
        let f = fixture();
        f.engine.push(save_entry(0)).unwrap();
        assert!(f.engine.has_pending_persist());

        f.engine.flush().unwrap();
        assert_eq!(stored_count(&f.db), 1);
        assert_eq!(f.scheduler.pending(), 0);
        assert_eq!(f.scheduler.advance(Duration::from_secs(5)), 0);
    }

    #[test]
    fn test_rehydration_and_double_initialize() {
        let f = fixture();
        for n in 0..4 {
            f.engine.push(save_entry(n)).unwrap();
        }
        f.engine.flush().unwrap();
        let before = f.engine.entries().unwrap();

        let restarted = fixture_on(f.db.clone());
        restarted.engine.initialize().unwrap();
        restarted.engine.initialize().unwrap();

        assert_eq!(restarted.engine.entries().unwrap(), before);
        assert_eq!(stored_count(&f.db), 4);
    }

    #[test]
    fn test_unflushed_changes_are_lost_on_restart() {
        let f = fixture();
        f.engine.push(save_entry(0)).unwrap();
        f.engine.push(save_entry(1)).unwrap();
        f.engine.flush().unwrap();
        f.engine.push(save_entry(2)).unwrap();

        // Process dies before the timer fires
        let restarted = fixture_on(f.db.clone());
        assert_eq!(restarted.engine.len().unwrap(), 2);
    }

    #[test]
    fn test_uninitialized_engine_never_clobbers_store() {
        let f = fixture();
        f.engine.push(save_entry(0)).unwrap();
        f.engine.flush().unwrap();

        let other = fixture_on(f.db.clone());
        other.engine.inner.persist().unwrap();
        assert_eq!(stored_count(&f.db), 1);
    }

    #[test]
    fn test_unknown_entries_are_skipped_on_load() {
        let f = fixture();
        f.db.write(Collection::UndoStack, |tx| {
            tx.append(&save_entry(0))?;
            tx.append(&serde_json::json!({
                "timestamp": 1,
                "action": { "type": "MoveTab", "payload": { "tabId": "t" } }
            }))?;
            tx.append(&save_entry(1))?;
            Ok(())
        })
        .unwrap();

        assert_eq!(f.engine.len().unwrap(), 2);
    }

    #[test]
    fn test_reentrant_undo_is_rejected() {
        let f = fixture();
        f.engine.push(save_entry(0)).unwrap();
        f.engine.inner.reverting.store(true, Ordering::Release);

        let err = f.engine.undo_last_action(&f.repo).unwrap_err();
        assert!(matches!(err, UndoError::Busy));
        assert_eq!(f.engine.len().unwrap(), 1);
    }

    #[test]
    fn test_undo_on_empty_stack() {
        let f = fixture();
        assert!(f.engine.undo_last_action(&f.repo).unwrap().is_none());
    }

    #[test]
    fn test_undo_save_deletes_session() {
        let f = fixture();
        let session = f.repo.create("Saved", tabs(1)).unwrap();
        f.engine
            .push(UndoEntry::new(UndoAction::SaveSession {
                session_id: session.id.clone(),
            }))
            .unwrap();

        f.engine.undo_last_action(&f.repo).unwrap();
        assert!(f.repo.get(&session.id).unwrap().is_none());
    }

    #[test]
    fn test_undo_delete_restores_full_session() {
        let f = fixture();
        let session = f.repo.create("Research", tabs(3)).unwrap();
        let prior = f.repo.delete(&session.id).unwrap().unwrap();
        f.engine
            .push(UndoEntry::new(UndoAction::DeleteSession { session: prior }))
            .unwrap();

        f.engine.undo_last_action(&f.repo).unwrap();
        assert_eq!(f.repo.require(&session.id).unwrap(), session);
    }

    #[test]
    fn test_undo_rename_restores_old_name() {
        let f = fixture();
        let session = f.repo.create("Old", tabs(1)).unwrap();
        f.repo
            .update(&session.id, SessionPatch::rename("New"))
            .unwrap();
        f.engine
            .push(UndoEntry::new(UndoAction::RenameSession {
                session_id: session.id.clone(),
                old_name: "Old".to_string(),
                new_name: "New".to_string(),
            }))
            .unwrap();

        f.engine.undo_last_action(&f.repo).unwrap();
        assert_eq!(f.repo.require(&session.id).unwrap().name, "Old");
    }

    #[test]
    fn test_undo_grouping_restores_prior_session() {
        let f = fixture();
        let session = f.repo.create("Grouped", tabs(2)).unwrap();
        let prior = f
            .repo
            .replace_groups(
                &session.id,
                vec![Group::new("Only", Vec::new())],
            )
            .unwrap();
        f.engine
            .push(UndoEntry::new(UndoAction::ApplyGrouping { previous: prior }))
            .unwrap();

        f.engine.undo_last_action(&f.repo).unwrap();
        assert_eq!(f.repo.require(&session.id).unwrap(), session);
    }

    #[test]
    fn test_undo_import_and_clear_restore_list() {
        let f = fixture();
        let a = f.repo.create("A", tabs(1)).unwrap();
        let b = f.repo.create("B", tabs(2)).unwrap();
        let before = f.repo.list().unwrap();

        let prior = f.repo.replace_all(&[Session::from_capture("Imported".to_string(), tabs(1))]).unwrap();
        f.engine
            .push(UndoEntry::new(UndoAction::Import { previous: prior }))
            .unwrap();
        f.engine.undo_last_action(&f.repo).unwrap();
        assert_eq!(f.repo.list().unwrap(), before);

        let prior = f.repo.clear_all().unwrap();
        f.engine
            .push(UndoEntry::new(UndoAction::ClearAll { previous: prior }))
            .unwrap();
        f.engine.undo_last_action(&f.repo).unwrap();

        let ids: Vec<_> = f.repo.list().unwrap().into_iter().map(|s| s.id).collect();
        assert!(ids.contains(&a.id) && ids.contains(&b.id));
    }

    #[test]
    fn test_failed_reversal_stays_popped() {
        let f = fixture();
        f.engine
            .push(UndoEntry::new(UndoAction::RenameSession {
                session_id: "missing".to_string(),
                old_name: "Old".to_string(),
                new_name: "New".to_string(),
            }))
            .unwrap();

        let err = f.engine.undo_last_action(&f.repo).unwrap_err();
        assert_eq!(err.code(), tabstash_storage::ErrorCode::NotFound);
        assert_eq!(f.engine.len().unwrap(), 0);

        // The guard is released after a failed dispatch
        assert!(f.engine.undo_last_action(&f.repo).unwrap().is_none());
    }
}
