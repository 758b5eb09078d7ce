//! Session data structures

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Group name used when captured tabs span more than one domain.
pub const MIXED_GROUP_NAME: &str = "All tabs";

/// A tab as handed over by the host's tab-capture facility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedTab {
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub favicon: Option<String>,
    #[serde(default)]
    pub last_accessed_at: Option<i64>,
}

impl CapturedTab {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            favicon: None,
            last_accessed_at: None,
        }
    }
}

/// Immutable value captured at save time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub favicon: Option<String>,
    /// Epoch milliseconds
    #[serde(rename = "lastAccessed", alias = "lastAccessedAt", default)]
    pub last_accessed_at: i64,
}

impl TabSnapshot {
    pub fn from_capture(tab: CapturedTab, captured_at: i64) -> Self {
        let domain = derive_domain(&tab.url);
        Self {
            title: tab.title,
            domain,
            url: tab.url,
            favicon: tab.favicon,
            last_accessed_at: tab.last_accessed_at.unwrap_or(captured_at),
        }
    }
}

/// Host of `url` without a leading `www.`; empty when the URL has no host.
pub fn derive_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .map(|host| host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
        .unwrap_or_default()
}

fn default_group_name(tabs: &[TabSnapshot]) -> String {
    let mut domains = tabs.iter().map(|t| t.domain.as_str());
    match domains.next() {
        Some(first) if !first.is_empty() && domains.all(|d| d == first) => first.to_string(),
        _ => MIXED_GROUP_NAME.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Unique within the owning session; empty means "not yet assigned"
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tabs: Vec<TabSnapshot>,
}

impl Group {
    pub fn new(name: impl Into<String>, tabs: Vec<TabSnapshot>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            tabs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Globally unique identifier
    pub id: String,
    pub name: String,
    /// Epoch milliseconds
    pub created_at: i64,
    pub groups: Vec<Group>,
}

impl Session {
    /// Build a session wrapping captured tabs in one default group.
    pub fn from_capture(name: String, tabs: Vec<CapturedTab>) -> Self {
        let now = Utc::now().timestamp_millis();
        let snapshots: Vec<TabSnapshot> = tabs
            .into_iter()
            .map(|tab| TabSnapshot::from_capture(tab, now))
            .collect();
        let group = Group::new(default_group_name(&snapshots), snapshots);

        Self {
            id: Uuid::new_v4().to_string(),
            name,
            created_at: now,
            groups: vec![group],
        }
    }

    pub fn tab_count(&self) -> usize {
        self.groups.iter().map(|g| g.tabs.len()).sum()
    }

    /// Give every group without an id, or with an id already used earlier
    /// in the session, a fresh one. Order is preserved.
    pub fn assign_group_ids(&mut self) {
        let mut seen = HashSet::new();
        for group in &mut self.groups {
            if group.id.is_empty() || !seen.insert(group.id.clone()) {
                group.id = Uuid::new_v4().to_string();
                seen.insert(group.id.clone());
            }
        }
    }
}

/// Fields that may be changed on an existing session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPatch {
    pub name: Option<String>,
    pub groups: Option<Vec<Group>>,
}

impl SessionPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            groups: None,
        }
    }

    pub fn groups(groups: Vec<Group>) -> Self {
        Self {
            name: None,
            groups: Some(groups),
        }
    }
}
