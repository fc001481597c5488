//! Backend capability interface.
//!
//! The only thing the core needs from a key-management provider is to look
//! a key up, wrap bytes, and unwrap bytes. Cloud adapters implement
//! [`KmsBackend`] outside this crate; [`RootKeyBackend`] implements it with a
//! local root key so the AEAD wrapper runs through the same envelope path.

use std::fmt;

use tracing::trace;

use super::envelope::{aead_decrypt, aead_encrypt, generate_nonce, DataKey, NONCE_SIZE};
use crate::error::BackendError;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Result of a key lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescription {
    /// Current version of the key. Equal to the requested id for backends
    /// without versioning.
    pub key_id: String,
}

/// Result of a wrap call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptOutput {
    /// Exact key version that wrapped the bytes.
    pub key_id: String,
    pub ciphertext: Vec<u8>,
}

/// Trait for KMS describe/encrypt/decrypt operations.
///
/// Implemented by provider adapters and test doubles.
pub trait KmsBackend: Send + Sync + fmt::Debug {
    fn describe_key(&self, key_id: &str) -> BackendResult<KeyDescription>;
    fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> BackendResult<EncryptOutput>;
    /// The ciphertext identifies its own key, so no key id is passed.
    fn decrypt(&self, ciphertext: &[u8]) -> BackendResult<Vec<u8>>;
}

/// Backend that wraps data keys with a local AES-GCM root key.
///
/// Wrapped form is `nonce || ciphertext`; the key id is bound as AAD.
pub struct RootKeyBackend {
    key_id: String,
    root: DataKey,
}

impl RootKeyBackend {
    pub fn new(key_id: String, root: DataKey) -> Self {
        Self { key_id, root }
    }
}

impl fmt::Debug for RootKeyBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootKeyBackend")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl KmsBackend for RootKeyBackend {
    fn describe_key(&self, key_id: &str) -> BackendResult<KeyDescription> {
        if key_id != self.key_id {
            return Err(BackendError::KeyNotFound(key_id.to_string()));
        }
        Ok(KeyDescription {
            key_id: self.key_id.clone(),
        })
    }

    fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> BackendResult<EncryptOutput> {
        if key_id != self.key_id {
            return Err(BackendError::KeyNotFound(key_id.to_string()));
        }
        let nonce = generate_nonce();
        let sealed = aead_encrypt(self.root.as_bytes(), &nonce, plaintext, key_id.as_bytes())
            .map_err(|e| BackendError::Rejected(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        trace!(key_id, wrapped_len = out.len(), "wrapped with root key");
        Ok(EncryptOutput {
            key_id: self.key_id.clone(),
            ciphertext: out,
        })
    }

    fn decrypt(&self, ciphertext: &[u8]) -> BackendResult<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(BackendError::Rejected("wrapped key too short".into()));
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
        aead_decrypt(self.root.as_bytes(), nonce, sealed, self.key_id.as_bytes())
            .map_err(|e| BackendError::Rejected(format!("unwrap with '{}': {}", self.key_id, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> RootKeyBackend {
        RootKeyBackend::new("root-1".to_string(), DataKey::from_bytes(vec![3u8; 32]))
    }

    #[test]
    fn test_root_key_wrap_roundtrip() {
        let b = backend();
        let out = b.encrypt("root-1", b"data key bytes").unwrap();
        assert_eq!(out.key_id, "root-1");
        assert_eq!(b.decrypt(&out.ciphertext).unwrap(), b"data key bytes");
    }

    #[test]
    fn test_root_key_unknown_id() {
        let b = backend();
        assert_eq!(
            b.describe_key("other"),
            Err(BackendError::KeyNotFound("other".into()))
        );
        assert!(b.encrypt("other", b"x").is_err());
    }

    #[test]
    fn test_root_key_rejects_foreign_wrap() {
        let out = backend().encrypt("root-1", b"dek").unwrap();
        let other = RootKeyBackend::new("root-1".into(), DataKey::from_bytes(vec![4u8; 32]));
        assert!(matches!(
            other.decrypt(&out.ciphertext),
            Err(BackendError::Rejected(_))
        ));
        assert!(other.decrypt(b"short").is_err());
    }

    #[test]
    fn test_debug_hides_root_key() {
        let dbg = format!("{:?}", backend());
        assert!(dbg.contains("root-1"));
        assert!(!dbg.contains("3, 3"));
    }
}
