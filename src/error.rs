//! Error types for kmswrap.
//!
//! One enum per failure class, folded into [`Error`]. A [`TransportError`]
//! means the wrapper implementation could not be reached; [`BackendError`]
//! and [`CipherError`] mean the key operation itself failed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plugin::PluginState;

/// Configuration failures. Fatal for the call, never retried internally.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("wrapper is not configured: call set_config first")]
    NotConfigured,

    #[error("key id not found (env or config) for {0} wrapper configuration")]
    MissingKeyId(String),

    #[error("root key not found in wrapper configuration")]
    MissingKey,

    #[error("invalid root key: {0}")]
    InvalidKey(String),

    #[error("invalid option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("error fetching key information for '{key_id}': {source}")]
    Probe {
        key_id: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to read settings file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("settings parse error: {0}")]
    Settings(#[from] toml::de::Error),

    #[error("remote configuration error: {0}")]
    Remote(String),
}

/// Failures reported by a key-management backend.
///
/// Surfaced verbatim; whether to retry is the caller's decision.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("remote backend error: {0}")]
    Remote(String),
}

/// Local AEAD failures.
#[derive(Error, Debug)]
pub enum CipherError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("remote cipher error: {0}")]
    Remote(String),
}

/// Failures of the process-isolation channel itself.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to spawn plugin: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("plugin handshake failed: {0}")]
    Handshake(String),

    #[error("plugin call '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("plugin disconnected during '{0}'")]
    Disconnected(String),

    #[error("plugin is not ready (state: {0})")]
    NotReady(PluginState),

    #[error("malformed plugin frame: {0}")]
    Malformed(String),

    #[error("plugin channel io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote transport error: {0}")]
    Remote(String),
}

/// Invalid arguments, rejected before any backend call.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("given plaintext for encryption is missing")]
    MissingPlaintext,

    #[error("given input for decryption is missing")]
    MissingBlob,

    #[error("given input for decryption has no key info")]
    MissingKeyInfo,

    #[error("remote input error: {0}")]
    Remote(String),
}

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Input(#[from] InputError),
}

/// Failure class, as carried across the plugin boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Backend,
    Cipher,
    Transport,
    Input,
}

impl Error {
    /// The failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Backend(_) => ErrorKind::Backend,
            Self::Cipher(_) => ErrorKind::Cipher,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Input(_) => ErrorKind::Input,
        }
    }

    /// True when the wrapper implementation could not be reached.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Rebuild an error received from the other side of the plugin boundary.
    pub fn from_remote(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Config => ConfigError::Remote(message).into(),
            ErrorKind::Backend => BackendError::Remote(message).into(),
            ErrorKind::Cipher => CipherError::Remote(message).into(),
            ErrorKind::Transport => TransportError::Remote(message).into(),
            ErrorKind::Input => InputError::Remote(message).into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let err: Error = InputError::MissingPlaintext.into();
        assert_eq!(err.kind(), ErrorKind::Input);
        assert!(!err.is_transport());

        let err: Error = TransportError::Disconnected("encrypt".into()).into();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_transport());
    }

    #[test]
    fn test_from_remote_keeps_kind() {
        for kind in [
            ErrorKind::Config,
            ErrorKind::Backend,
            ErrorKind::Cipher,
            ErrorKind::Transport,
            ErrorKind::Input,
        ] {
            let err = Error::from_remote(kind, "boom".to_string());
            assert_eq!(err.kind(), kind);
            assert!(err.to_string().contains("boom"));
        }
    }

    #[test]
    fn test_probe_error_names_key() {
        let err: Error = ConfigError::Probe {
            key_id: "key-1".to_string(),
            source: BackendError::Unavailable("connection refused".into()),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("key-1"));
        assert!(msg.contains("connection refused"));
    }
}
