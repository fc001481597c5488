//! Cryptographic wrappers.
//!
//! Provides the envelope engine and the wrapper implementations built on it.
//!
//! ## Wrappers
//!
//! - **aead**: local root key, wrap or HKDF-derive mode. No external calls.
//! - **kms**: data keys wrapped by a [`KmsBackend`] supplied by the caller.
//!
//! ## Adding a New Backend
//!
//! 1. Implement [`KmsBackend`] for the provider's client
//! 2. Implement [`KmsConnector`] to build it from [`KmsOptions`]
//! 3. Describe its env vars and precedence with a [`KmsProfile`]
//! 4. Construct a [`KmsWrapper`] from the two

mod aead;
mod backend;
pub mod envelope;
mod kms;

pub use aead::{AeadOption, AeadOptions, AeadType, AeadWrapper, HashType, KeyMode};
pub use backend::{BackendResult, EncryptOutput, KeyDescription, KmsBackend, RootKeyBackend};
pub use envelope::{DataKey, EnvelopeInfo};
pub use kms::{
    FixedConnector, KeyIdPrecedence, KmsConnector, KmsOption, KmsOptions, KmsProfile, KmsWrapper,
};
