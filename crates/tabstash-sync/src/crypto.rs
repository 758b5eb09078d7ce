//! Encryption Gateway
//!
//! AES-256-GCM with a key derived by PBKDF2-HMAC-SHA256 from the user-scoped
//! secret. Wire layout before base64: `nonce (12 bytes) || ciphertext+tag`.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use sha2::Sha256;

use crate::error::SyncError;
use crate::Result;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
const KEY_SALT: &[u8] = b"tabstash-sync-key-v1";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// The authenticated user as seen by the sync layer.
#[derive(Clone)]
pub struct SyncIdentity {
    pub user_id: String,
    secret: String,
}

impl SyncIdentity {
    pub fn new(user_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for SyncIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncIdentity")
            .field("user_id", &self.user_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

pub struct EncryptionGateway {
    key: [u8; 32],
}

impl EncryptionGateway {
    pub fn derive(identity: &SyncIdentity) -> Self {
        Self::derive_with_iterations(&identity.secret, PBKDF2_ITERATIONS)
    }

    pub fn derive_with_iterations(secret: &str, iterations: u32) -> Self {
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), KEY_SALT, iterations, &mut key);
        Self { key }
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|_| SyncError::Crypto("invalid key length"))
    }

    /// Encrypt and base64-encode `plaintext`. A fresh random nonce is used
    /// for every call.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let cipher = self.cipher()?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| SyncError::Crypto("encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt(&self, payload: &str) -> Result<Vec<u8>> {
        let raw = BASE64
            .decode(payload.trim())
            .map_err(|_| SyncError::Crypto("payload is not valid base64"))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(SyncError::Crypto("payload too short"));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SyncError::Crypto("authentication failed"))
    }
}

impl std::fmt::Debug for EncryptionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionGateway { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabstash_storage::ErrorCode;

    fn gateway(secret: &str) -> EncryptionGateway {
        EncryptionGateway::derive_with_iterations(secret, 1_000)
    }

    #[test]
    fn test_roundtrip_encrypt_decrypt() {
        let gw = gateway("user-secret");
        let payload = gw.encrypt(b"{\"sessions\":[]}").unwrap();
        assert_eq!(gw.decrypt(&payload).unwrap(), b"{\"sessions\":[]}");
    }

    #[test]
    fn test_ciphertext_is_opaque_and_randomized() {
        let gw = gateway("user-secret");
        let a = gw.encrypt(b"Research tabs").unwrap();
        let b = gw.encrypt(b"Research tabs").unwrap();
        assert_ne!(a, b);

        let raw = BASE64.decode(&a).unwrap();
        assert!(!raw.windows(8).any(|w| w == b"Research"));
    }

    #[test]
    fn test_altered_byte_fails_authentication() {
        let gw = gateway("user-secret");
        let payload = gw.encrypt(b"hello world").unwrap();
        let mut raw = BASE64.decode(&payload).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;

        let err = gw.decrypt(&BASE64.encode(raw)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CryptoFailure);
    }

    #[test]
    fn test_wrong_key_fails() {
        let payload = gateway("old-secret").encrypt(b"hello").unwrap();
        let err = gateway("rotated-secret").decrypt(&payload).unwrap_err();
        assert!(matches!(err, SyncError::Crypto(_)));
    }

    #[test]
    fn test_garbage_payloads_fail_cleanly() {
        let gw = gateway("user-secret");
        assert!(matches!(gw.decrypt("%%%"), Err(SyncError::Crypto(_))));
        assert!(matches!(gw.decrypt("QUJD"), Err(SyncError::Crypto(_))));
    }

    #[test]
    fn test_same_secret_derives_same_key() {
        let payload = gateway("stable").encrypt(b"x").unwrap();
        assert_eq!(gateway("stable").decrypt(&payload).unwrap(), b"x");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let identity = SyncIdentity::new("user-1", "hunter2");
        assert!(!format!("{identity:?}").contains("hunter2"));
    }
}
