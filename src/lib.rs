//! kmswrap - Key-management wrappers with envelope encryption and
//! process-isolated plugins.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── core/             # Core library components
//! │   ├── wrapper       # Wrapper trait (the uniform contract)
//! │   ├── types         # BlobInfo, KeyInfo, WrapperConfig
//! │   ├── options       # Layered option resolution
//! │   ├── settings      # TOML wrapper settings
//! │   ├── keyid         # Lock-free current key id
//! │   ├── env           # Environment lookup
//! │   └── cipher/       # Wrapper implementations
//! │       ├── envelope  # Data-key AEAD engine
//! │       ├── backend   # KmsBackend trait
//! │       ├── aead      # Local root-key wrapper
//! │       └── kms       # Remote KMS wrapper
//! ├── plugin/           # Process isolation
//! │   ├── protocol      # Newline-delimited JSON frames
//! │   ├── server        # Plugin side (serve_plugin)
//! │   └── client        # Host side (PluginClient)
//! └── testing           # Test wrapper and in-memory KMS
//! ```
//!
//! # Features
//!
//! - One contract for local keys, remote KMS, and subprocess wrappers
//! - AES-GCM envelope encryption with a fresh data key per call
//! - Env > config map > option precedence, configurable per backend
//! - Plugin crashes and hangs surface as transport errors

pub mod core;
pub mod error;
pub mod plugin;
pub mod testing;

pub use crate::core::options::{Options, WrapOption};
pub use crate::core::types::{BlobInfo, KeyInfo, KeyMechanism, WrapperConfig, WrapperType};
pub use crate::core::wrapper::Wrapper;
pub use crate::error::{Error, Result};
pub use crate::plugin::{serve_plugin, PluginClient};
