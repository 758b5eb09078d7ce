//! Undo entries
//!
//! Each variant carries exactly the state needed to reverse one command.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tabstash_session::Session;

/// Maximum number of entries kept; the oldest are dropped first.
pub const MAX_UNDO_DEPTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum UndoAction {
    /// A session was saved; undo deletes it.
    #[serde(rename_all = "camelCase")]
    SaveSession { session_id: String },
    /// A session was deleted; undo reinserts the captured value.
    DeleteSession { session: Session },
    /// A session was renamed; undo restores the old name.
    #[serde(rename_all = "camelCase")]
    RenameSession {
        session_id: String,
        old_name: String,
        new_name: String,
    },
    /// Groups were replaced; undo restores the prior session wholesale.
    ApplyGrouping { previous: Session },
    /// The collection was replaced by an import or remote restore.
    Import { previous: Vec<Session> },
    /// The collection was emptied.
    ClearAll { previous: Vec<Session> },
}

impl UndoAction {
    pub fn kind(&self) -> &'static str {
        match self {
            UndoAction::SaveSession { .. } => "SaveSession",
            UndoAction::DeleteSession { .. } => "DeleteSession",
            UndoAction::RenameSession { .. } => "RenameSession",
            UndoAction::ApplyGrouping { .. } => "ApplyGrouping",
            UndoAction::Import { .. } => "Import",
            UndoAction::ClearAll { .. } => "ClearAll",
        }
    }

    /// Short user-facing description, e.g. for an "Undo …" button.
    pub fn describe(&self) -> String {
        match self {
            UndoAction::SaveSession { .. } => "Save session".to_string(),
            UndoAction::DeleteSession { session } => format!("Delete \"{}\"", session.name),
            UndoAction::RenameSession { new_name, .. } => format!("Rename to \"{}\"", new_name),
            UndoAction::ApplyGrouping { previous } => format!("Regroup \"{}\"", previous.name),
            UndoAction::Import { .. } => "Import sessions".to_string(),
            UndoAction::ClearAll { previous } => format!("Clear {} sessions", previous.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoEntry {
    /// Epoch milliseconds
    pub timestamp: i64,
    pub action: UndoAction,
}

impl UndoEntry {
    pub fn new(action: UndoAction) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            action,
        }
    }
}
