//! HTTP remote blob store
//!
//! `PUT {base}/sync/{user}` stores a blob, `GET {base}/sync/{user}` fetches
//! it (`204`/`404` when none exists). Requests carry the host-issued bearer
//! token.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use reqwest::StatusCode;
use tracing::{debug, instrument};
use url::Url;

use crate::error::SyncError;
use crate::remote::{PutReceipt, RemoteBlob, RemoteBlobStore, UploadBlob};
use crate::Result;

pub struct HttpBlobStore {
    http_client: HttpClient,
    base_url: Url,
    api_token: String,
}

impl HttpBlobStore {
    /// Fails with `Validation` when `base_url` is not an absolute http(s) URL.
    pub fn new(base_url: &str, api_token: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|_| SyncError::Validation("sync endpoint is not a valid URL".to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Validation(
                "sync endpoint cannot carry a path".to_string(),
            ));
        }

        Ok(Self {
            http_client: HttpClient::new(),
            base_url,
            api_token: api_token.into(),
        })
    }

    /// `{base}/sync/{user}` with the user id percent-encoded as one segment.
    fn blob_url(&self, user_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Validation("sync endpoint cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(["sync", user_id]);
        Ok(url)
    }
}

fn unavailable(context: &str, err: reqwest::Error) -> SyncError {
    // Drop the URL: it carries the user id
    SyncError::RemoteUnavailable(format!("{context}: {}", err.without_url()))
}

#[async_trait]
impl RemoteBlobStore for HttpBlobStore {
    #[instrument(skip(self, blob), level = "debug")]
    async fn put(&self, user_id: &str, blob: UploadBlob) -> Result<PutReceipt> {
        let response = self
            .http_client
            .put(self.blob_url(user_id)?)
            .bearer_auth(&self.api_token)
            .json(&blob)
            .send()
            .await
            .map_err(|e| unavailable("sync PUT request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::RemoteUnavailable(format!(
                "sync PUT failed with status {}",
                status
            )));
        }

        let receipt = response
            .json::<PutReceipt>()
            .await
            .map_err(|e| unavailable("sync PUT response unreadable", e))?;
        debug!(synced_at = %receipt.synced_at, "Uploaded sync blob");
        Ok(receipt)
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, user_id: &str) -> Result<Option<RemoteBlob>> {
        let response = self
            .http_client
            .get(self.blob_url(user_id)?)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| unavailable("sync GET request failed", e))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
            debug!("No sync blob stored");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SyncError::RemoteUnavailable(format!(
                "sync GET failed with status {}",
                status
            )));
        }

        let blob = response
            .json::<RemoteBlob>()
            .await
            .map_err(|e| unavailable("sync GET response unreadable", e))?;
        Ok(Some(blob))
    }
}
