//! Remote opaque-blob collaborator
//!
//! One encrypted blob per authenticated user, overwritten on every upload.
//! The remote never sees plaintext.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadBlob {
    /// base64 ciphertext
    pub payload: String,
    pub schema_version: u32,
    /// ISO-8601
    pub client_timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutReceipt {
    /// ISO-8601 server time
    pub synced_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBlob {
    pub payload: String,
    pub schema_version: u32,
    pub last_synced_at: String,
}

#[async_trait]
pub trait RemoteBlobStore: Send + Sync {
    /// Store `blob` for `user_id`, replacing any previous blob.
    async fn put(&self, user_id: &str, blob: UploadBlob) -> Result<PutReceipt>;

    /// Fetch the blob for `user_id`; `None` when nothing was uploaded.
    async fn get(&self, user_id: &str) -> Result<Option<RemoteBlob>>;
}

/// In-process blob store used offline and in tests.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, RemoteBlob>>,
    last_synced: RwLock<Option<DateTime<Utc>>>,
    offline: AtomicBool,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a network outage: every call fails with `RemoteUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::Acquire) {
            return Err(SyncError::RemoteUnavailable("remote is offline".to_string()));
        }
        Ok(())
    }

    /// Server clock that never runs backwards.
    fn server_now(&self) -> DateTime<Utc> {
        let mut last = self.last_synced.write();
        let now = match *last {
            Some(prev) if prev > Utc::now() => prev,
            _ => Utc::now(),
        };
        *last = Some(now);
        now
    }
}

#[async_trait]
impl RemoteBlobStore for InMemoryBlobStore {
    async fn put(&self, user_id: &str, blob: UploadBlob) -> Result<PutReceipt> {
        self.check_online()?;
        let synced_at = self
            .server_now()
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        self.blobs.write().insert(
            user_id.to_string(),
            RemoteBlob {
                payload: blob.payload,
                schema_version: blob.schema_version,
                last_synced_at: synced_at.clone(),
            },
        );

        Ok(PutReceipt { synced_at })
    }

    async fn get(&self, user_id: &str) -> Result<Option<RemoteBlob>> {
        self.check_online()?;
        Ok(self.blobs.read().get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get_returns_same_payload() {
        let store = InMemoryBlobStore::new();
        let receipt = store
            .put(
                "user-1",
                UploadBlob {
                    payload: "QUJD".to_string(),
                    schema_version: 1,
                    client_timestamp: Utc::now().to_rfc3339(),
                },
            )
            .await
            .unwrap();

        let blob = store.get("user-1").await.unwrap().unwrap();
        assert_eq!(blob.payload, "QUJD");
        assert_eq!(blob.schema_version, 1);
        assert!(blob.last_synced_at >= receipt.synced_at);
    }

    #[tokio::test]
    async fn test_missing_user_is_none() {
        let store = InMemoryBlobStore::new();
        assert!(store.get("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blobs_are_per_user_and_overwritten() {
        let store = InMemoryBlobStore::new();
        for (user, payload) in [("a", "one"), ("b", "two"), ("a", "three")] {
            store
                .put(
                    user,
                    UploadBlob {
                        payload: payload.to_string(),
                        schema_version: 1,
                        client_timestamp: String::new(),
                    },
                )
                .await
                .unwrap();
        }

        assert_eq!(store.get("a").await.unwrap().unwrap().payload, "three");
        assert_eq!(store.get("b").await.unwrap().unwrap().payload, "two");
    }

    #[tokio::test]
    async fn test_offline_is_remote_unavailable() {
        let store = InMemoryBlobStore::new();
        store.set_offline(true);
        let err = store.get("a").await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteUnavailable(_)));
    }
}
