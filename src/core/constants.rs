//! Constants used throughout kmswrap.
//!
//! Centralizes protocol values and environment variable names.

/// Plugin protocol version spoken by this build.
pub const PROTOCOL_VERSION: u32 = 1;

/// Env var carrying the magic cookie from host to plugin.
pub const MAGIC_COOKIE_KEY: &str = "KMSWRAP_PLUGIN_MAGIC_COOKIE";

/// Shared magic cookie value. Not a secret; it only proves the binary was
/// launched by a plugin host.
pub const MAGIC_COOKIE_VALUE: &str = "b1f6a4c3e9d24ab0a2f35c1e7d8e6f90kmswrap";

/// Env var listing the protocol versions the host accepts.
pub const PROTOCOL_VERSIONS_KEY: &str = "KMSWRAP_PLUGIN_PROTOCOL_VERSIONS";

/// Env var holding the log filter for the plugin binary.
pub const LOG_ENV: &str = "KMSWRAP_LOG";

/// Default per-call timeout for plugin calls, in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Default handshake timeout, in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
