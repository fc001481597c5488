//! Envelope encryption engine.
//!
//! Payloads are encrypted locally with AES-GCM under a fresh random data
//! key; only the data key is handed to a [`KmsBackend`] for wrapping.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use tracing::trace;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::backend::KmsBackend;
use crate::core::types::{BlobInfo, KeyInfo, KeyMechanism};
use crate::error::{CipherError, Result};

/// Data key size in bytes (AES-256).
pub const DATA_KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// Symmetric key material. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    bytes: Vec<u8>,
}

impl DataKey {
    /// Generate a random 256-bit key.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; DATA_KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey(***)")
    }
}

/// Plaintext data key plus the payload it protects.
#[derive(Debug)]
pub struct EnvelopeInfo {
    pub key: DataKey,
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Fresh random 96-bit nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// AES-GCM encryption with a 128- or 256-bit key.
pub fn aead_encrypt(key: &[u8], iv: &[u8], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if iv.len() != NONCE_SIZE {
        return Err(CipherError::EncryptionFailed(format!(
            "nonce must be {} bytes, got {}",
            NONCE_SIZE,
            iv.len()
        ))
        .into());
    }
    let nonce = Nonce::from_slice(iv);
    let payload = Payload { msg, aad };
    let sealed = match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?
            .encrypt(nonce, payload),
        32 => Aes256Gcm::new_from_slice(key)
            .map_err(|e| CipherError::EncryptionFailed(e.to_string()))?
            .encrypt(nonce, payload),
        n => {
            return Err(
                CipherError::EncryptionFailed(format!("unsupported key length: {}", n)).into(),
            )
        }
    };
    sealed.map_err(|e| CipherError::EncryptionFailed(format!("aead seal: {}", e)).into())
}

/// AES-GCM decryption with a 128- or 256-bit key.
pub fn aead_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if iv.len() != NONCE_SIZE {
        return Err(CipherError::DecryptionFailed(format!(
            "nonce must be {} bytes, got {}",
            NONCE_SIZE,
            iv.len()
        ))
        .into());
    }
    let nonce = Nonce::from_slice(iv);
    let payload = Payload {
        msg: ciphertext,
        aad,
    };
    let opened = match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .map_err(|e| CipherError::DecryptionFailed(e.to_string()))?
            .decrypt(nonce, payload),
        32 => Aes256Gcm::new_from_slice(key)
            .map_err(|e| CipherError::DecryptionFailed(e.to_string()))?
            .decrypt(nonce, payload),
        n => {
            return Err(
                CipherError::DecryptionFailed(format!("unsupported key length: {}", n)).into(),
            )
        }
    };
    opened.map_err(|_| {
        CipherError::DecryptionFailed("authentication failed: wrong key or tampered data".into())
            .into()
    })
}

/// Encrypt `plaintext` under a fresh data key.
pub fn envelope_encrypt(plaintext: &[u8], aad: Option<&[u8]>) -> Result<EnvelopeInfo> {
    let key = DataKey::generate();
    let iv = generate_nonce();
    let ciphertext = aead_encrypt(key.as_bytes(), &iv, plaintext, aad.unwrap_or_default())?;
    trace!(
        plaintext_len = plaintext.len(),
        ciphertext_len = ciphertext.len(),
        "envelope encrypted"
    );
    Ok(EnvelopeInfo {
        key,
        iv: iv.to_vec(),
        ciphertext,
    })
}

/// Decrypt an envelope whose data key has been recovered.
pub fn envelope_decrypt(info: &EnvelopeInfo, aad: Option<&[u8]>) -> Result<Vec<u8>> {
    aead_decrypt(
        info.key.as_bytes(),
        &info.iv,
        &info.ciphertext,
        aad.unwrap_or_default(),
    )
}

/// Derive a 256-bit key with HKDF-SHA256.
pub fn derive_key(root: &[u8], salt: Option<&[u8]>, info: Option<&[u8]>) -> Result<DataKey> {
    let hk = Hkdf::<Sha256>::new(salt, root);
    let mut okm = vec![0u8; DATA_KEY_SIZE];
    hk.expand(info.unwrap_or_default(), &mut okm)
        .map_err(|e| CipherError::EncryptionFailed(format!("hkdf expand: {}", e)))?;
    Ok(DataKey::from_bytes(okm))
}

/// Envelope-encrypt `plaintext` and wrap the data key with `backend`.
///
/// The returned key info names the key version reported by the backend.
pub fn seal(
    backend: &dyn KmsBackend,
    key_id: &str,
    plaintext: &[u8],
    aad: Option<&[u8]>,
) -> Result<BlobInfo> {
    let env = envelope_encrypt(plaintext, aad)?;
    let wrapped = backend.encrypt(key_id, env.key.as_bytes())?;
    trace!(key_id = %wrapped.key_id, wrapped_len = wrapped.ciphertext.len(), "data key wrapped");
    Ok(BlobInfo {
        ciphertext: env.ciphertext,
        iv: env.iv,
        key_info: Some(KeyInfo {
            key_id: wrapped.key_id,
            wrapped_key: wrapped.ciphertext,
            mechanism: KeyMechanism::Envelope,
        }),
    })
}

/// Unwrap the data key with `backend` and decrypt the payload.
pub fn open(
    backend: &dyn KmsBackend,
    blob: &BlobInfo,
    info: &KeyInfo,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let key = DataKey::from_bytes(backend.decrypt(&info.wrapped_key)?);
    let env = EnvelopeInfo {
        key,
        iv: blob.iv.clone(),
        ciphertext: blob.ciphertext.clone(),
    };
    envelope_decrypt(&env, aad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_envelope_roundtrip() {
        let env = envelope_encrypt(b"secret payload", None).unwrap();
        assert_eq!(env.key.len(), DATA_KEY_SIZE);
        assert_eq!(env.iv.len(), NONCE_SIZE);
        assert_eq!(envelope_decrypt(&env, None).unwrap(), b"secret payload");
    }

    #[test]
    fn test_envelope_empty_plaintext() {
        let env = envelope_encrypt(b"", None).unwrap();
        assert_eq!(envelope_decrypt(&env, None).unwrap(), b"");
    }

    #[test]
    fn test_fresh_key_and_nonce_per_call() {
        let a = envelope_encrypt(b"same", None).unwrap();
        let b = envelope_encrypt(b"same", None).unwrap();
        assert_ne!(a.key.as_bytes(), b.key.as_bytes());
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_aad_must_match() {
        let env = envelope_encrypt(b"payload", Some(b"context")).unwrap();
        assert!(envelope_decrypt(&env, Some(b"context")).is_ok());
        let err = envelope_decrypt(&env, Some(b"other")).unwrap_err();
        assert!(matches!(err, Error::Cipher(CipherError::DecryptionFailed(_))));
        assert!(envelope_decrypt(&env, None).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut env = envelope_encrypt(b"payload", None).unwrap();
        env.ciphertext[0] ^= 0xff;
        assert!(matches!(
            envelope_decrypt(&env, None),
            Err(Error::Cipher(CipherError::DecryptionFailed(_)))
        ));
    }

    #[test]
    fn test_bad_nonce_length_is_an_error() {
        let mut env = envelope_encrypt(b"payload", None).unwrap();
        env.iv.truncate(4);
        assert!(envelope_decrypt(&env, None).is_err());
    }

    #[test]
    fn test_aes128_key_supported() {
        let key = [7u8; 16];
        let iv = generate_nonce();
        let ct = aead_encrypt(&key, &iv, b"short key", b"").unwrap();
        assert_eq!(aead_decrypt(&key, &iv, &ct, b"").unwrap(), b"short key");
    }

    #[test]
    fn test_unsupported_key_length() {
        let iv = generate_nonce();
        assert!(aead_encrypt(&[1u8; 20], &iv, b"x", b"").is_err());
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        let a = derive_key(b"root key material", Some(b"salt"), Some(b"info")).unwrap();
        let b = derive_key(b"root key material", Some(b"salt"), Some(b"info")).unwrap();
        let c = derive_key(b"root key material", Some(b"salt"), Some(b"other")).unwrap();
        let d = derive_key(b"root key material", None, None).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
        assert_ne!(a.as_bytes(), d.as_bytes());
        assert_eq!(a.len(), DATA_KEY_SIZE);
    }

    #[test]
    fn test_data_key_debug_redacted() {
        let key = DataKey::generate();
        assert_eq!(format!("{:?}", key), "DataKey(***)");
    }
}
