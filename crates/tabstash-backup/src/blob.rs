//! Backup snapshot and the portable export format

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use tabstash_session::Session;

use crate::error::BackupError;
use crate::Result;

/// Export format version written by this build and the newest one accepted.
pub const SCHEMA_VERSION: u32 = 1;

/// Maximum number of stored backups; the oldest are pruned first.
pub const MAX_BACKUPS: usize = 24;

/// A full, exportable snapshot of the session collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupBlob {
    pub schema_version: u32,
    /// ISO-8601 UTC
    #[serde(default)]
    pub timestamp: String,
    /// Newest first
    pub sessions: Vec<Session>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

impl BackupBlob {
    pub fn new(sessions: Vec<Session>, settings: Option<Value>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            sessions,
            settings,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn tab_count(&self) -> usize {
        self.sessions.iter().map(Session::tab_count).sum()
    }
}

/// Serialize a snapshot to the portable text format.
pub fn export_text(blob: &BackupBlob) -> Result<String> {
    Ok(serde_json::to_string_pretty(blob)?)
}

fn invalid(message: impl Into<String>) -> BackupError {
    BackupError::Validation(message.into())
}

/// Parse and validate exported text.
///
/// Fail-closed: any violation rejects the whole document.
pub fn parse_import(text: &str) -> Result<BackupBlob> {
    let root: Value =
        serde_json::from_str(text).map_err(|e| invalid(format!("not valid JSON ({e})")))?;
    let Value::Object(root) = root else {
        return Err(invalid("top level must be an object"));
    };

    let schema_version = match root.get("schemaVersion") {
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|v| v.fract() == 0.0 && *v >= 1.0)
            .map(|v| v as u64)
            .ok_or_else(|| invalid("schemaVersion must be a positive integer"))?,
        _ => return Err(invalid("schemaVersion must be a number")),
    };
    if schema_version > u64::from(SCHEMA_VERSION) {
        return Err(invalid(format!(
            "schemaVersion {schema_version} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    let Some(Value::Array(raw_sessions)) = root.get("sessions") else {
        return Err(invalid("sessions must be an array"));
    };

    let mut seen = HashSet::new();
    let mut sessions = Vec::with_capacity(raw_sessions.len());
    for (index, raw) in raw_sessions.iter().enumerate() {
        let session = validate_session(index, raw)?;
        if !seen.insert(session.id.clone()) {
            return Err(invalid(format!("session {index}: duplicate id")));
        }
        sessions.push(session);
    }

    let timestamp = root
        .get("timestamp")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let settings = root.get("settings").filter(|v| !v.is_null()).cloned();

    Ok(BackupBlob {
        schema_version: schema_version as u32,
        timestamp,
        sessions,
        settings,
    })
}

fn validate_session(index: usize, raw: &Value) -> Result<Session> {
    let Value::Object(fields) = raw else {
        return Err(invalid(format!("session {index}: must be an object")));
    };

    match fields.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => {}
        _ => return Err(invalid(format!("session {index}: missing id"))),
    }

    let created_at = match fields.get("createdAt") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| {
                // 1.0 is accepted as 1; 1.7 is not a timestamp
                n.as_f64()
                    .filter(|v| v.fract() == 0.0 && v.abs() < i64::MAX as f64)
                    .map(|v| v as i64)
            })
            .ok_or_else(|| invalid(format!("session {index}: createdAt must be an integer")))?,
        _ => return Err(invalid(format!("session {index}: createdAt must be a number"))),
    };

    if !matches!(fields.get("groups"), Some(Value::Array(_))) {
        return Err(invalid(format!("session {index}: groups must be an array")));
    }

    let mut normalized = fields.clone();
    normalized.insert("createdAt".to_string(), Value::from(created_at));

    // serde messages can quote field values, so only the position is reported
    serde_json::from_value(Value::Object(normalized))
        .map_err(|_| invalid(format!("session {index}: malformed session fields")))
}
