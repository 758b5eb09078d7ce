//! Vault configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CoreError;
use crate::Result;

const DEFAULT_UNDO_DEBOUNCE_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the database file
    pub database_path: PathBuf,
    /// Delay before a burst of undo changes is written to disk
    pub undo_debounce_ms: u64,
    /// Optional cap on database pages
    pub max_page_count: Option<u32>,
    /// Base URL of the sync blob service
    pub sync_endpoint: Option<String>,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            database_path: data_dir.join("tabstash.db"),
            undo_debounce_ms: DEFAULT_UNDO_DEBOUNCE_MS,
            max_page_count: None,
            sync_endpoint: None,
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("Tabstash"))
            .unwrap_or_else(|| PathBuf::from(".tabstash"))
    }

    /// Read a JSON config file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn undo_debounce(&self) -> Duration {
        Duration::from_millis(self.undo_debounce_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        }
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }
}
