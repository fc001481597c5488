//! Core library components.
//!
//! The wrapper contract, its data model, option resolution, and the
//! wrappers implemented in-process.

pub mod cipher;
pub mod constants;
pub mod env;
pub mod keyid;
pub mod options;
pub mod settings;
pub mod types;
pub mod wrapper;
