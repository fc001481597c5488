//! Deterministic test doubles.
//!
//! Neither type here protects anything. [`TestWrapper`] gives byte-identical
//! output for identical input, which makes it useful for checking that the
//! plugin channel is transparent; [`MemoryKms`] is an in-memory
//! [`KmsBackend`] with versioned keys that can be rotated out of band.

use std::sync::atomic::{AtomicUsize, Ordering};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;

use crate::core::cipher::{BackendResult, EncryptOutput, KeyDescription, KmsBackend};
use crate::core::keyid::KeyIdCell;
use crate::core::options::Options;
use crate::core::types::{BlobInfo, KeyInfo, KeyMechanism, WrapperConfig, WrapperType};
use crate::core::wrapper::{require_blob, require_plaintext, Wrapper};
use crate::error::{BackendError, CipherError, Result};

/// Key id a fresh [`TestWrapper`] reports.
pub const TEST_KEY_ID: &str = "static-key";

/// Wrapper that XORs the payload with a fixed secret.
#[derive(Debug)]
pub struct TestWrapper {
    secret: Vec<u8>,
    configured_key_id: KeyIdCell,
    current_key_id: KeyIdCell,
}

impl TestWrapper {
    pub fn new(secret: &[u8]) -> Self {
        let w = Self {
            secret: secret.to_vec(),
            configured_key_id: KeyIdCell::new(),
            current_key_id: KeyIdCell::new(),
        };
        w.configured_key_id.store(TEST_KEY_ID);
        w.current_key_id.store(TEST_KEY_ID);
        w
    }

    /// Switch the key used by later encrypts, as a backend-side rotation
    /// would. `key_id()` is unaffected until the next encrypt.
    pub fn set_key_id(&self, key_id: &str) {
        self.configured_key_id.store(key_id);
    }

    fn xor(&self, input: &[u8]) -> Vec<u8> {
        if self.secret.is_empty() {
            return input.to_vec();
        }
        input
            .iter()
            .zip(self.secret.iter().cycle())
            .map(|(b, s)| b ^ s)
            .collect()
    }
}

impl Wrapper for TestWrapper {
    fn wrapper_type(&self) -> WrapperType {
        WrapperType::Test
    }

    fn set_config(&self, opts: &Options) -> Result<WrapperConfig> {
        let key_id = opts
            .key_id
            .clone()
            .or_else(|| opts.config("key_id").map(str::to_string))
            .unwrap_or_else(|| self.configured_key_id.load());
        self.configured_key_id.store(key_id.clone());
        self.current_key_id.store(key_id.clone());
        Ok(WrapperConfig::new(WrapperType::Test).with("key_id", &key_id))
    }

    fn key_id(&self) -> Result<String> {
        Ok(self.current_key_id.load())
    }

    fn encrypt(&self, plaintext: Option<&[u8]>, _opts: &Options) -> Result<BlobInfo> {
        let plaintext = require_plaintext(plaintext)?;
        let key_id = self.configured_key_id.load();
        let blob = BlobInfo {
            ciphertext: self.xor(plaintext),
            iv: Vec::new(),
            key_info: Some(KeyInfo {
                key_id: key_id.clone(),
                wrapped_key: Vec::new(),
                mechanism: KeyMechanism::Direct,
            }),
        };
        self.current_key_id.store(key_id);
        Ok(blob)
    }

    fn decrypt(&self, blob: Option<&BlobInfo>, _opts: &Options) -> Result<Vec<u8>> {
        let (blob, info) = require_blob(blob)?;
        if info.mechanism != KeyMechanism::Direct {
            return Err(CipherError::DecryptionFailed(format!(
                "test wrapper cannot decrypt {:?} blobs",
                info.mechanism
            ))
            .into());
        }
        Ok(self.xor(&blob.ciphertext))
    }
}

#[derive(Debug)]
struct MemoryState {
    primary: String,
    versions: Vec<String>,
    unavailable: bool,
}

/// In-memory KMS with a single key and rotatable versions.
///
/// Wrapped form is `<version>:<base64 plaintext>`.
#[derive(Debug)]
pub struct MemoryKms {
    key_id: String,
    state: Mutex<MemoryState>,
    calls: AtomicUsize,
}

impl MemoryKms {
    /// A key `key_id` whose primary version is `version`.
    pub fn new(key_id: &str, version: &str) -> Self {
        Self {
            key_id: key_id.to_string(),
            state: Mutex::new(MemoryState {
                primary: version.to_string(),
                versions: vec![version.to_string()],
                unavailable: false,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make `version` the primary version. Older versions stay usable for
    /// decryption.
    pub fn rotate(&self, version: &str) {
        let mut state = self.state.lock();
        state.primary = version.to_string();
        if !state.versions.iter().any(|v| v == version) {
            state.versions.push(version.to_string());
        }
    }

    /// Fail every call with [`BackendError::Unavailable`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn primary(&self) -> String {
        self.state.lock().primary.clone()
    }

    /// Number of backend calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> BackendResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if state.unavailable {
            return Err(BackendError::Unavailable("memory kms is offline".into()));
        }
        Ok(state.primary.clone())
    }

    fn check_key(&self, key_id: &str) -> BackendResult<()> {
        if key_id == self.key_id {
            Ok(())
        } else {
            Err(BackendError::KeyNotFound(key_id.to_string()))
        }
    }
}

impl KmsBackend for MemoryKms {
    fn describe_key(&self, key_id: &str) -> BackendResult<KeyDescription> {
        let primary = self.enter()?;
        self.check_key(key_id)?;
        Ok(KeyDescription { key_id: primary })
    }

    fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> BackendResult<EncryptOutput> {
        let primary = self.enter()?;
        self.check_key(key_id)?;
        let ciphertext = format!("{}:{}", primary, STANDARD.encode(plaintext)).into_bytes();
        Ok(EncryptOutput {
            key_id: primary,
            ciphertext,
        })
    }

    fn decrypt(&self, ciphertext: &[u8]) -> BackendResult<Vec<u8>> {
        self.enter()?;
        let text = std::str::from_utf8(ciphertext)
            .map_err(|_| BackendError::Rejected("ciphertext is not utf-8".into()))?;
        let (version, encoded) = text
            .rsplit_once(':')
            .ok_or_else(|| BackendError::Rejected("not a memory kms ciphertext".into()))?;
        if !self.state.lock().versions.iter().any(|v| v == version) {
            return Err(BackendError::KeyNotFound(version.to_string()));
        }
        STANDARD
            .decode(encoded)
            .map_err(|e| BackendError::Rejected(format!("invalid base64: {}", e)))
    }
}
