//! Backend-delegating KMS wrapper.
//!
//! [`KmsWrapper`] envelope-encrypts payloads locally and asks a
//! [`KmsBackend`] to wrap the data key. Provider specifics (names,
//! environment variables, precedence) come from a [`KmsProfile`]; the client
//! itself is built by a [`KmsConnector`] from the resolved [`KmsOptions`].
//!
//! ## Config map keys
//!
//! | key | value |
//! |---|---|
//! | `key_id` | key id |
//! | `kms_key_id` | deprecated alias for `key_id` |
//! | `region`, `endpoint` | client location |
//! | `access_key`, `secret_key` | credentials (never echoed in metadata) |
//! | `project_id` (`projectId`) | provider project |

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{debug, trace};

use super::backend::KmsBackend;
use super::envelope;
use crate::core::env::{EnvSource, ProcessEnv};
use crate::core::keyid::KeyIdCell;
use crate::core::options::{Options, WrapOption};
use crate::core::types::{BlobInfo, WrapperConfig, WrapperType};
use crate::core::wrapper::{require_blob, require_plaintext, Wrapper};
use crate::error::{ConfigError, Result};

/// Where the key id comes from when several sources supply one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyIdPrecedence {
    /// Current env var, then legacy env var, then resolved options.
    EnvironmentFirst,
    /// Resolved options, then current env var, then legacy env var.
    OptionsFirst,
}

/// Static description of one KMS provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsProfile {
    /// Backend name, used in the wrapper type (`kms:<name>`).
    pub name: &'static str,
    /// Env var overriding the key id.
    pub key_id_env: &'static str,
    /// Deprecated env var still honored for compatibility.
    pub legacy_key_id_env: Option<&'static str>,
    pub precedence: KeyIdPrecedence,
}

impl KmsProfile {
    pub fn new(name: &'static str, key_id_env: &'static str) -> Self {
        Self {
            name,
            key_id_env,
            legacy_key_id_env: None,
            precedence: KeyIdPrecedence::EnvironmentFirst,
        }
    }

    pub fn legacy_env(mut self, name: &'static str) -> Self {
        self.legacy_key_id_env = Some(name);
        self
    }

    pub fn precedence(mut self, precedence: KeyIdPrecedence) -> Self {
        self.precedence = precedence;
        self
    }

    /// Pick the key id from env and options per this profile's order.
    pub fn resolve_key_id(&self, env: &dyn EnvSource, opts: &KmsOptions) -> Option<String> {
        let from_env = || {
            env.var(self.key_id_env)
                .or_else(|| self.legacy_key_id_env.and_then(|name| env.var(name)))
        };
        let from_opts = || opts.base.key_id.clone().filter(|k| !k.is_empty());
        match self.precedence {
            KeyIdPrecedence::EnvironmentFirst => from_env().or_else(from_opts),
            KeyIdPrecedence::OptionsFirst => from_opts().or_else(from_env),
        }
    }
}

/// Typed options local to the KMS wrapper.
#[derive(Clone, PartialEq, Eq)]
pub enum KmsOption {
    KeyId(String),
    Region(String),
    Endpoint(String),
    AccessKey(String),
    SecretKey(String),
    ProjectId(String),
}

impl fmt::Debug for KmsOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyId(v) => f.debug_tuple("KeyId").field(v).finish(),
            Self::Region(v) => f.debug_tuple("Region").field(v).finish(),
            Self::Endpoint(v) => f.debug_tuple("Endpoint").field(v).finish(),
            Self::AccessKey(_) => f.write_str("AccessKey(***)"),
            Self::SecretKey(_) => f.write_str("SecretKey(***)"),
            Self::ProjectId(v) => f.debug_tuple("ProjectId").field(v).finish(),
        }
    }
}

/// Resolved options for [`KmsWrapper`].
#[derive(Clone, Default)]
pub struct KmsOptions {
    pub base: Options,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub project_id: Option<String>,
}

impl fmt::Debug for KmsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsOptions")
            .field("key_id", &self.base.key_id)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("project_id", &self.project_id)
            .field("has_credentials", &self.access_key.is_some())
            .finish()
    }
}

impl KmsOptions {
    /// Resolve a mixed option sequence. Local options win over the config map.
    pub fn resolve(opts: impl IntoIterator<Item = WrapOption<KmsOption>>) -> Result<Self> {
        let (base, local) = Options::partition(opts);
        let mut resolved = Self {
            base,
            ..Self::default()
        };

        // Deprecated spellings only apply when the current key is unset.
        if let Some(v) = config_value(&resolved.base, &["key_id", "kms_key_id"]) {
            resolved.base.key_id = Some(v);
        }
        let base = &resolved.base;
        resolved.region = config_value(base, &["region"]);
        resolved.endpoint = config_value(base, &["endpoint"]);
        resolved.access_key = config_value(base, &["access_key"]);
        resolved.secret_key = config_value(base, &["secret_key"]);
        resolved.project_id = config_value(base, &["project_id", "projectId"]);

        for opt in local {
            match opt {
                KmsOption::KeyId(v) => resolved.base.key_id = Some(v),
                KmsOption::Region(v) => resolved.region = Some(v),
                KmsOption::Endpoint(v) => resolved.endpoint = Some(v),
                KmsOption::AccessKey(v) => resolved.access_key = Some(v),
                KmsOption::SecretKey(v) => resolved.secret_key = Some(v),
                KmsOption::ProjectId(v) => resolved.project_id = Some(v),
            }
        }

        Ok(resolved)
    }
}

/// First non-empty config map value among `keys`, in order.
fn config_value(opts: &Options, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| opts.config(k)).map(str::to_string)
}

/// Builds a backend client from resolved options.
pub trait KmsConnector: Send + Sync + fmt::Debug {
    fn connect(&self, opts: &KmsOptions) -> Result<Arc<dyn KmsBackend>>;
}

/// Connector that always hands out the same client.
#[derive(Debug, Clone)]
pub struct FixedConnector(pub Arc<dyn KmsBackend>);

impl KmsConnector for FixedConnector {
    fn connect(&self, _opts: &KmsOptions) -> Result<Arc<dyn KmsBackend>> {
        Ok(Arc::clone(&self.0))
    }
}

/// Configured state, replaced as a whole on reconfiguration.
#[derive(Debug)]
struct KmsState {
    client: Arc<dyn KmsBackend>,
    key_id: String,
}

/// Wrapper delegating data-key wrapping to a KMS backend.
#[derive(Debug)]
pub struct KmsWrapper {
    profile: KmsProfile,
    connector: Arc<dyn KmsConnector>,
    env: Arc<dyn EnvSource>,
    state: ArcSwapOption<KmsState>,
    current_key_id: KeyIdCell,
}

impl KmsWrapper {
    pub fn new(profile: KmsProfile, connector: Arc<dyn KmsConnector>) -> Self {
        Self {
            profile,
            connector,
            env: Arc::new(ProcessEnv),
            state: ArcSwapOption::empty(),
            current_key_id: KeyIdCell::new(),
        }
    }

    /// Wrapper over an already-built client.
    pub fn with_client(profile: KmsProfile, client: Arc<dyn KmsBackend>) -> Self {
        Self::new(profile, Arc::new(FixedConnector(client)))
    }

    /// Replace the environment source.
    pub fn with_env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }

    pub fn profile(&self) -> &KmsProfile {
        &self.profile
    }

    /// Configure from a mixed option sequence including local options.
    ///
    /// The new client is built and probed before it replaces the old one.
    pub fn set_config_with(
        &self,
        opts: impl IntoIterator<Item = WrapOption<KmsOption>>,
    ) -> Result<WrapperConfig> {
        let opts = KmsOptions::resolve(opts)?;

        let key_id = self
            .profile
            .resolve_key_id(self.env.as_ref(), &opts)
            .ok_or_else(|| ConfigError::MissingKeyId(self.profile.name.to_string()))?;

        let client = self.connector.connect(&opts)?;
        let description = client
            .describe_key(&key_id)
            .map_err(|source| ConfigError::Probe {
                key_id: key_id.clone(),
                source,
            })?;

        self.state.store(Some(Arc::new(KmsState {
            client,
            key_id: key_id.clone(),
        })));
        // An alias resolves to the concrete key version here.
        self.current_key_id.store(description.key_id.clone());

        debug!(
            backend = self.profile.name,
            key_id = %key_id,
            current = %description.key_id,
            "kms wrapper configured"
        );

        Ok(WrapperConfig::new(self.wrapper_type())
            .with("kms_key_id", &key_id)
            .with("region", opts.region.as_deref().unwrap_or_default())
            .with("endpoint", opts.endpoint.as_deref().unwrap_or_default())
            .with("project_id", opts.project_id.as_deref().unwrap_or_default()))
    }

    fn configured(&self) -> Result<Arc<KmsState>> {
        self.state
            .load_full()
            .ok_or_else(|| ConfigError::NotConfigured.into())
    }
}

impl Wrapper for KmsWrapper {
    fn wrapper_type(&self) -> WrapperType {
        WrapperType::Kms(self.profile.name.to_string())
    }

    fn set_config(&self, opts: &Options) -> Result<WrapperConfig> {
        self.set_config_with(Vec::<WrapOption<KmsOption>>::from(opts.clone()))
    }

    fn key_id(&self) -> Result<String> {
        Ok(self.current_key_id.load())
    }

    fn encrypt(&self, plaintext: Option<&[u8]>, opts: &Options) -> Result<BlobInfo> {
        let plaintext = require_plaintext(plaintext)?;
        let state = self.configured()?;

        trace!(
            backend = self.profile.name,
            key_id = %state.key_id,
            plaintext_len = plaintext.len(),
            "encrypting with kms"
        );
        let blob = envelope::seal(
            state.client.as_ref(),
            &state.key_id,
            plaintext,
            opts.aad.as_deref(),
        )?;

        if let Some(info) = &blob.key_info {
            self.current_key_id.store(info.key_id.clone());
        }
        Ok(blob)
    }

    fn decrypt(&self, blob: Option<&BlobInfo>, opts: &Options) -> Result<Vec<u8>> {
        let (blob, info) = require_blob(blob)?;
        let state = self.configured()?;

        trace!(
            backend = self.profile.name,
            key_id = %info.key_id,
            ciphertext_len = blob.ciphertext.len(),
            "decrypting with kms"
        );
        envelope::open(state.client.as_ref(), blob, info, opts.aad.as_deref())
    }
}
