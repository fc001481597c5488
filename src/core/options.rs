//! Layered option resolution.
//!
//! Every wrapper accepts a mixed sequence of [`WrapOption`] values: generic
//! ones understood by all wrappers, and `Local` ones typed for a single
//! backend. Resolution runs in four steps:
//!
//! 1. partition the sequence into generic and local values
//! 2. fold the generic values into the canonical [`Options`] record
//! 3. expand the well-known keys of `Options::config_map` into typed local
//!    fields (done by each backend's `resolve`)
//! 4. apply the local values in call order, overwriting anything the config
//!    map set
//!
//! Only [`Options`] crosses the plugin boundary, so anything that must work
//! for an isolated wrapper has to be expressible in the config map.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::core::types::b64_opt;
use crate::error::{ConfigError, Result};

/// Canonical generic options record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Key id override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Flat string settings, expanded by each backend.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_map: BTreeMap<String, String>,
    /// Additional authenticated data for AEAD operations.
    #[serde(
        default,
        with = "b64_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub aad: Option<Vec<u8>>,
    /// Deadline for the call. Carried as the request timeout across the
    /// plugin boundary, never inside the serialized options.
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Set a single config map entry.
    pub fn with_config(mut self, key: &str, value: impl Into<String>) -> Self {
        self.config_map.insert(key.to_string(), value.into());
        self
    }

    pub fn with_aad(mut self, aad: impl Into<Vec<u8>>) -> Self {
        self.aad = Some(aad.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Split a mixed option sequence into the canonical record and the
    /// backend-local values, preserving the order of the latter.
    pub fn partition<L>(opts: impl IntoIterator<Item = WrapOption<L>>) -> (Self, Vec<L>) {
        let mut resolved = Self::default();
        let mut local = Vec::new();
        for opt in opts {
            match opt {
                WrapOption::KeyId(id) => resolved.key_id = Some(id),
                WrapOption::ConfigMap(map) => resolved.config_map = map,
                WrapOption::Aad(aad) => resolved.aad = Some(aad),
                WrapOption::Timeout(t) => resolved.timeout = Some(t),
                WrapOption::Local(l) => local.push(l),
            }
        }
        (resolved, local)
    }

    /// Config map value for `key`, ignoring empty strings.
    pub fn config(&self, key: &str) -> Option<&str> {
        self.config_map
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Backend with no local options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoLocal {}

/// One option value in a mixed sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrapOption<L = NoLocal> {
    KeyId(String),
    /// Replaces the whole config map.
    ConfigMap(BTreeMap<String, String>),
    Aad(Vec<u8>),
    Timeout(Duration),
    Local(L),
}

impl<L> From<Options> for Vec<WrapOption<L>> {
    fn from(opts: Options) -> Self {
        let mut out = Vec::new();
        if let Some(id) = opts.key_id {
            out.push(WrapOption::KeyId(id));
        }
        if !opts.config_map.is_empty() {
            out.push(WrapOption::ConfigMap(opts.config_map));
        }
        if let Some(aad) = opts.aad {
            out.push(WrapOption::Aad(aad));
        }
        if let Some(t) = opts.timeout {
            out.push(WrapOption::Timeout(t));
        }
        out
    }
}

/// Decode a base64 config map value.
pub(crate) fn decode_base64(key: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD.decode(value.trim()).map_err(|e| {
        ConfigError::InvalidOption {
            key: key.to_string(),
            reason: format!("invalid base64: {}", e),
        }
        .into()
    })
}

/// Encode bytes for a config map value.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
