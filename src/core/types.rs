//! Wire-stable data model shared by every wrapper.
//!
//! [`BlobInfo`] is the durable representation of an encrypted secret. Byte
//! fields serialize as standard base64 text so the JSON form can be stored
//! or sent across the plugin boundary unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Kind of wrapper implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WrapperType {
    /// Local AEAD wrapper built from the root key alone.
    Aead,
    /// Deterministic test wrapper.
    Test,
    /// Backend-delegating wrapper, named after its backend (e.g. `ucloudkms`).
    Kms(String),
}

impl fmt::Display for WrapperType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aead => f.write_str("aead"),
            Self::Test => f.write_str("test"),
            Self::Kms(name) => write!(f, "kms:{}", name),
        }
    }
}

impl FromStr for WrapperType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aead" => Ok(Self::Aead),
            "test" => Ok(Self::Test),
            other => match other.strip_prefix("kms:") {
                Some(name) if !name.is_empty() => Ok(Self::Kms(name.to_string())),
                _ => Err(format!("unknown wrapper type: {}", other)),
            },
        }
    }
}

impl Serialize for WrapperType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WrapperType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Non-sensitive description of a configured wrapper.
///
/// Never carries secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperConfig {
    pub wrapper_type: WrapperType,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl WrapperConfig {
    pub fn new(wrapper_type: WrapperType) -> Self {
        Self {
            wrapper_type,
            metadata: BTreeMap::new(),
        }
    }

    /// Add a metadata entry, skipping empty values.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        if !value.is_empty() {
            self.metadata.insert(key.to_string(), value.to_string());
        }
        self
    }
}

/// How the data key of a blob was protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMechanism {
    /// Random data key wrapped by a backend.
    #[default]
    Envelope,
    /// Data key derived locally with HKDF; nothing is wrapped.
    Derived,
    /// No data key; the wrapper transforms the payload itself.
    Direct,
}

/// Key metadata for one encrypted blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Exact key version that performed the operation.
    pub key_id: String,
    #[serde(with = "b64", default)]
    pub wrapped_key: Vec<u8>,
    #[serde(default)]
    pub mechanism: KeyMechanism,
}

/// Result of one encrypt call.
///
/// `ciphertext` and `iv` always come from the same operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64", default)]
    pub iv: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_info: Option<KeyInfo>,
}

impl BlobInfo {
    /// Serialize to the JSON storage form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse the JSON storage form.
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// Standard base64 encoding for byte fields.
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// Standard base64 encoding for optional byte fields.
pub(crate) mod b64_opt {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}
