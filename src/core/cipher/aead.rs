//! Local AEAD wrapper.
//!
//! Reference [`Wrapper`] built from local cryptography only. Two key modes:
//!
//! - **wrap** (default): each payload gets a fresh data key, wrapped under
//!   the configured root key by a [`RootKeyBackend`].
//! - **derive**: the payload key is derived from the root key with
//!   HKDF-SHA256 plus optional salt and info; nothing is wrapped.
//!
//! ## Config map keys
//!
//! | key | value |
//! |---|---|
//! | `key` | root key, standard base64 (16 or 32 bytes) |
//! | `key_id` | key id override |
//! | `key_mode` | `wrap` or `derive` |
//! | `salt`, `info` | HKDF inputs, standard base64 |
//! | `aead_type` | `aes-gcm` |
//! | `hash_type` | `sha256` |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::backend::RootKeyBackend;
use super::envelope::{self, aead_decrypt, aead_encrypt, derive_key, generate_nonce, DataKey};
use crate::core::keyid::KeyIdCell;
use crate::core::options::{decode_base64, encode_base64, Options, WrapOption};
use crate::core::types::{BlobInfo, KeyInfo, KeyMechanism, WrapperConfig, WrapperType};
use crate::core::wrapper::{require_blob, require_plaintext, Wrapper};
use crate::error::{CipherError, ConfigError, Result};

/// AEAD algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AeadType {
    #[default]
    AesGcm,
}

impl fmt::Display for AeadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AesGcm => f.write_str("aes-gcm"),
        }
    }
}

impl FromStr for AeadType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aes-gcm" | "aes_gcm" | "aesgcm" => Ok(Self::AesGcm),
            other => Err(format!("unknown aead type: {}", other)),
        }
    }
}

/// Hash used for key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashType {
    #[default]
    Sha256,
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => f.write_str("sha256"),
        }
    }
}

impl FromStr for HashType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(format!("unknown hash type: {}", other)),
        }
    }
}

/// How payload keys are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyMode {
    #[default]
    Wrap,
    Derive,
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wrap => f.write_str("wrap"),
            Self::Derive => f.write_str("derive"),
        }
    }
}

impl FromStr for KeyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wrap" => Ok(Self::Wrap),
            "derive" => Ok(Self::Derive),
            other => Err(format!("unknown key mode: {}", other)),
        }
    }
}

/// Typed options local to the AEAD wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AeadOption {
    AeadType(AeadType),
    HashType(HashType),
    /// Root key, standard base64.
    Key(String),
    Salt(Vec<u8>),
    Info(Vec<u8>),
    KeyMode(KeyMode),
}

/// Resolved options for [`AeadWrapper`].
#[derive(Debug, Clone, Default)]
pub struct AeadOptions {
    pub base: Options,
    pub aead_type: AeadType,
    pub hash_type: HashType,
    pub key: Option<String>,
    pub salt: Option<Vec<u8>>,
    pub info: Option<Vec<u8>>,
    pub key_mode: KeyMode,
}

fn parse_field<T: FromStr<Err = String>>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|reason| {
        ConfigError::InvalidOption {
            key: key.to_string(),
            reason,
        }
        .into()
    })
}

impl AeadOptions {
    /// Resolve a mixed option sequence. Local options win over the config map.
    pub fn resolve(opts: impl IntoIterator<Item = WrapOption<AeadOption>>) -> Result<Self> {
        let (base, local) = Options::partition(opts);
        let mut resolved = Self {
            base,
            ..Self::default()
        };

        let map = resolved.base.config_map.clone();
        for (k, v) in &map {
            match k.as_str() {
                "aead_type" => resolved.aead_type = parse_field(k, v)?,
                "hash_type" => resolved.hash_type = parse_field(k, v)?,
                "key_mode" => resolved.key_mode = parse_field(k, v)?,
                "key" => resolved.key = Some(v.clone()),
                "key_id" => resolved.base.key_id = Some(v.clone()),
                "salt" => resolved.salt = Some(decode_base64(k, v)?),
                "info" => resolved.info = Some(decode_base64(k, v)?),
                _ => {}
            }
        }

        for opt in local {
            match opt {
                AeadOption::AeadType(t) => resolved.aead_type = t,
                AeadOption::HashType(h) => resolved.hash_type = h,
                AeadOption::Key(k) => resolved.key = Some(k),
                AeadOption::Salt(s) => resolved.salt = Some(s),
                AeadOption::Info(i) => resolved.info = Some(i),
                AeadOption::KeyMode(m) => resolved.key_mode = m,
            }
        }

        Ok(resolved)
    }
}

/// Configured state, replaced as a whole on reconfiguration.
#[derive(Debug)]
struct AeadState {
    key_id: String,
    mode: KeyMode,
    root: RootKeyBackend,
    derived: DataKey,
}

/// Wrapper that encrypts with a local root key.
#[derive(Debug, Default)]
pub struct AeadWrapper {
    state: ArcSwapOption<AeadState>,
    current_key_id: KeyIdCell,
}

/// Default key id: a short fingerprint of the root key.
fn fingerprint(root: &[u8]) -> String {
    let digest = Sha256::digest(root);
    let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("aead-{}", hex)
}

impl AeadWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// A random 256-bit root key, base64-encoded for the `key` option.
    pub fn generate_key() -> String {
        encode_base64(DataKey::generate().as_bytes())
    }

    /// Configure from a mixed option sequence including local options.
    pub fn set_config_with(
        &self,
        opts: impl IntoIterator<Item = WrapOption<AeadOption>>,
    ) -> Result<WrapperConfig> {
        let opts = AeadOptions::resolve(opts)?;

        let encoded = opts.key.as_deref().filter(|k| !k.is_empty()).ok_or(ConfigError::MissingKey)?;
        let root = decode_base64("key", encoded).map_err(|_| {
            ConfigError::InvalidKey("root key must be standard base64".to_string())
        })?;
        if root.len() != 16 && root.len() != 32 {
            return Err(ConfigError::InvalidKey(format!(
                "root key must be 16 or 32 bytes, got {}",
                root.len()
            ))
            .into());
        }

        let key_id = opts
            .base
            .key_id
            .clone()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| fingerprint(&root));
        let derived = derive_key(&root, opts.salt.as_deref(), opts.info.as_deref())?;

        let state = AeadState {
            key_id: key_id.clone(),
            mode: opts.key_mode,
            root: RootKeyBackend::new(key_id.clone(), DataKey::from_bytes(root)),
            derived,
        };
        self.state.store(Some(Arc::new(state)));
        self.current_key_id.store(key_id.clone());

        debug!(key_id = %key_id, key_mode = %opts.key_mode, "aead wrapper configured");

        Ok(WrapperConfig::new(WrapperType::Aead)
            .with("key_id", &key_id)
            .with("aead_type", &opts.aead_type.to_string())
            .with("hash_type", &opts.hash_type.to_string())
            .with("key_mode", &opts.key_mode.to_string()))
    }

    fn configured(&self) -> Result<Arc<AeadState>> {
        self.state
            .load_full()
            .ok_or_else(|| ConfigError::NotConfigured.into())
    }
}

impl Wrapper for AeadWrapper {
    fn wrapper_type(&self) -> WrapperType {
        WrapperType::Aead
    }

    fn set_config(&self, opts: &Options) -> Result<WrapperConfig> {
        self.set_config_with(Vec::<WrapOption<AeadOption>>::from(opts.clone()))
    }

    fn key_id(&self) -> Result<String> {
        Ok(self.current_key_id.load())
    }

    fn encrypt(&self, plaintext: Option<&[u8]>, opts: &Options) -> Result<BlobInfo> {
        let plaintext = require_plaintext(plaintext)?;
        let state = self.configured()?;
        let aad = opts.aad.as_deref();

        let blob = match state.mode {
            KeyMode::Wrap => envelope::seal(&state.root, &state.key_id, plaintext, aad)?,
            KeyMode::Derive => {
                let iv = generate_nonce();
                let ciphertext = aead_encrypt(
                    state.derived.as_bytes(),
                    &iv,
                    plaintext,
                    aad.unwrap_or_default(),
                )?;
                BlobInfo {
                    ciphertext,
                    iv: iv.to_vec(),
                    key_info: Some(KeyInfo {
                        key_id: state.key_id.clone(),
                        wrapped_key: Vec::new(),
                        mechanism: KeyMechanism::Derived,
                    }),
                }
            }
        };

        self.current_key_id.store(state.key_id.clone());
        Ok(blob)
    }

    fn decrypt(&self, blob: Option<&BlobInfo>, opts: &Options) -> Result<Vec<u8>> {
        let (blob, info) = require_blob(blob)?;
        let state = self.configured()?;
        let aad = opts.aad.as_deref();

        match info.mechanism {
            KeyMechanism::Envelope => envelope::open(&state.root, blob, info, aad),
            KeyMechanism::Derived => aead_decrypt(
                state.derived.as_bytes(),
                &blob.iv,
                &blob.ciphertext,
                aad.unwrap_or_default(),
            ),
            KeyMechanism::Direct => Err(CipherError::DecryptionFailed(
                "aead wrapper cannot decrypt direct blobs".to_string(),
            )
            .into()),
        }
    }
}
