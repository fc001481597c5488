//! Wrapper settings files.
//!
//! Reads a TOML document describing one wrapper and turns it into the
//! canonical [`Options`] record, so the same file works for in-process and
//! plugin wrappers:
//!
//! ```toml
//! [wrapper]
//! type = "aead"
//! key_id = "root-1"
//!
//! [wrapper.config]
//! key = "<base64>"
//! key_mode = "derive"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::core::options::Options;
use crate::core::types::WrapperType;
use crate::error::{ConfigError, Result};

/// Parsed settings document.
#[derive(Debug, Deserialize)]
pub struct WrapperSettings {
    pub wrapper: WrapperSection,
}

/// The `[wrapper]` table.
#[derive(Debug, Deserialize)]
pub struct WrapperSection {
    /// Wrapper type string (`aead`, `test`, `kms:<name>`).
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub key_id: Option<String>,
    /// Flattened into the config map; scalars are stringified.
    #[serde(default)]
    pub config: BTreeMap<String, toml::Value>,
}

impl WrapperSettings {
    /// Parse settings from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let settings: Self = toml::from_str(contents).map_err(ConfigError::Settings)?;
        settings.wrapper_type()?;
        Ok(settings)
    }

    /// Load settings from a file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadFile` if the file can't be read, or
    /// `ConfigError::Settings` if the TOML is malformed.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading wrapper settings");
        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::from_toml_str(&contents)
    }

    pub fn wrapper_type(&self) -> Result<WrapperType> {
        self.wrapper.kind.parse().map_err(|reason| {
            ConfigError::InvalidOption {
                key: "type".to_string(),
                reason,
            }
            .into()
        })
    }

    /// Canonical options for `set_config`.
    pub fn options(&self) -> Result<Options> {
        let mut opts = Options::new();
        opts.key_id = self.wrapper.key_id.clone();
        for (key, value) in &self.wrapper.config {
            let text = match value {
                toml::Value::String(s) => s.clone(),
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                _ => {
                    return Err(ConfigError::InvalidOption {
                        key: key.clone(),
                        reason: "expected a scalar value".to_string(),
                    }
                    .into())
                }
            };
            opts.config_map.insert(key.clone(), text);
        }
        Ok(opts)
    }
}
