//! Session Repository
//!
//! CRUD over the `sessions` collection. Each method is one
//! single-collection transaction; methods that destroy or replace data
//! return the prior value so the caller can record an undo entry.

use std::collections::HashSet;

use tabstash_storage::{Collection, Database, Order};

use crate::error::SessionError;
use crate::session::{CapturedTab, Group, Session, SessionPatch};
use crate::Result;

fn normalize_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SessionError::EmptyName);
    }
    Ok(trimmed.to_string())
}

pub struct SessionRepository {
    db: Database,
}

impl SessionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// All sessions, newest first by `createdAt`.
    pub fn list(&self) -> Result<Vec<Session>> {
        Ok(self
            .db
            .read(Collection::Sessions, |tx| tx.get_all(Order::Descending))?)
    }

    pub fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.db.read(Collection::Sessions, |tx| tx.get(session_id))?)
    }

    pub fn require(&self, session_id: &str) -> Result<Session> {
        self.get(session_id)?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.db.read(Collection::Sessions, |tx| tx.count())?)
    }

    /// Save captured tabs as a new session with one default group.
    pub fn create(&self, name: &str, tabs: Vec<CapturedTab>) -> Result<Session> {
        let name = normalize_name(name)?;
        let session = Session::from_capture(name, tabs);

        self.db.write(Collection::Sessions, |tx| {
            tx.put(&session.id, session.created_at, &session)
        })?;

        tracing::info!(
            session_id = %session.id,
            tab_count = session.tab_count(),
            "Created session"
        );

        Ok(session)
    }

    /// Insert a complete session, overwriting any session with the same id.
    pub fn insert(&self, session: &Session) -> Result<()> {
        self.db.write(Collection::Sessions, |tx| {
            tx.put(&session.id, session.created_at, session)
        })?;
        Ok(())
    }

    /// Merge `patch` into an existing session and persist it.
    pub fn update(&self, session_id: &str, patch: SessionPatch) -> Result<Session> {
        let name = patch.name.as_deref().map(normalize_name).transpose()?;

        let updated = self.db.write(Collection::Sessions, |tx| {
            let Some(mut session) = tx.get::<Session>(session_id)? else {
                return Ok(None);
            };
            if let Some(name) = name {
                session.name = name;
            }
            if let Some(groups) = patch.groups {
                session.groups = groups;
                session.assign_group_ids();
            }
            tx.put(&session.id, session.created_at, &session)?;
            Ok(Some(session))
        })?;

        updated.ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Remove a session, returning its full prior value if it existed.
    pub fn delete(&self, session_id: &str) -> Result<Option<Session>> {
        let prior = self.db.write(Collection::Sessions, |tx| {
            let prior = tx.get::<Session>(session_id)?;
            if prior.is_some() {
                tx.delete(session_id)?;
            }
            Ok(prior)
        })?;

        if prior.is_some() {
            tracing::info!(session_id = %session_id, "Deleted session");
        }
        Ok(prior)
    }

    /// Empty the collection, returning every prior session (newest first).
    pub fn clear_all(&self) -> Result<Vec<Session>> {
        let prior = self.db.write(Collection::Sessions, |tx| {
            let prior = tx.get_all::<Session>(Order::Descending)?;
            tx.clear()?;
            Ok(prior)
        })?;

        tracing::info!(count = prior.len(), "Cleared all sessions");
        Ok(prior)
    }

    /// Replace a session's groups, returning the full prior session.
    pub fn replace_groups(&self, session_id: &str, groups: Vec<Group>) -> Result<Session> {
        let prior = self.db.write(Collection::Sessions, |tx| {
            let Some(prior) = tx.get::<Session>(session_id)? else {
                return Ok(None);
            };
            let mut session = prior.clone();
            session.groups = groups;
            session.assign_group_ids();
            tx.put(&session.id, session.created_at, &session)?;
            Ok(Some(prior))
        })?;

        let prior = prior.ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        tracing::info!(session_id = %session_id, "Replaced session groups");
        Ok(prior)
    }

    /// Replace the whole collection in one transaction, returning the prior
    /// sessions (newest first). `sessions` is expected newest first, as
    /// returned by [`SessionRepository::list`]. Groups with a missing or
    /// repeated id are stored under a fresh one.
    pub fn replace_all(&self, sessions: &[Session]) -> Result<Vec<Session>> {
        let mut seen = HashSet::new();
        for session in sessions {
            if !seen.insert(session.id.as_str()) {
                return Err(SessionError::DuplicateId(session.id.clone()));
            }
        }

        let sessions: Vec<Session> = sessions
            .iter()
            .cloned()
            .map(|mut session| {
                session.assign_group_ids();
                session
            })
            .collect();

        let prior = self.db.write(Collection::Sessions, |tx| {
            let prior = tx.get_all::<Session>(Order::Descending)?;
            tx.clear()?;
            // Oldest first so ties on createdAt keep their relative order
            for session in sessions.iter().rev() {
                tx.put(&session.id, session.created_at, session)?;
            }
            Ok(prior)
        })?;

        tracing::info!(
            previous = prior.len(),
            restored = sessions.len(),
            "Replaced all sessions"
        );
        Ok(prior)
    }
}

impl Clone for SessionRepository {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
        }
    }
}
