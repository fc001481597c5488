//! Test support utilities for kmswrap integration tests.
//!
//! Provides configured wrappers and plugin launch helpers.

#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use fixtures::*;

use std::process::Command;
use std::time::Duration;

use kmswrap::core::constants::LOG_ENV;
use kmswrap::PluginClient;

/// Command for the plugin binary serving `mode`.
pub fn plugin_command(mode: &str) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_kmswrap-plugin"));
    cmd.arg(mode).env(LOG_ENV, "kmswrap=debug");
    cmd
}

/// Start a plugin with short timeouts so hung tests fail fast.
pub fn start_plugin(mode: &str) -> PluginClient {
    PluginClient::builder(plugin_command(mode))
        .handshake_timeout(Duration::from_secs(10))
        .call_timeout(Duration::from_secs(10))
        .start()
        .expect("failed to start plugin")
}
