//! Tabstash Sync
//!
//! Encrypts a full session snapshot on the client and stores it as one
//! opaque blob per user on a remote service. Restoring is two-phase: a
//! decrypted preview is fetched and shown first, and only an explicit
//! confirmation replaces local sessions.

mod crypto;
mod error;
mod http;
mod orchestrator;
mod remote;

pub use crypto::{EncryptionGateway, SyncIdentity, PBKDF2_ITERATIONS};
pub use error::SyncError;
pub use http::HttpBlobStore;
pub use orchestrator::{AppliedSync, PreviewOutcome, SyncOrchestrator, SyncPreview, SyncState, UploadReceipt};
pub use remote::{InMemoryBlobStore, PutReceipt, RemoteBlob, RemoteBlobStore, UploadBlob};

pub type Result<T> = std::result::Result<T, SyncError>;
