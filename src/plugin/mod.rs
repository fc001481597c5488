//! Process-isolation plugins.
//!
//! A wrapper can run in a child process and be driven over its stdio. The
//! host side is [`PluginClient`], which itself implements
//! [`Wrapper`](crate::core::wrapper::Wrapper); the plugin side is
//! [`serve_plugin`]. A crash, hang, or kill of the child surfaces to the
//! caller as a [`TransportError`](crate::error::TransportError) and never
//! takes the host down.

mod client;
pub mod protocol;
mod server;

use std::fmt;

pub use client::{PluginBuilder, PluginClient};
pub use server::{check_handshake, serve_plugin, Server};

/// Lifecycle of a plugin connection, as seen by the host.
///
/// `NotStarted → Handshaking → Ready → Closing → Terminated`. Any state
/// can drop to `Terminated` when the child exits or is killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    NotStarted,
    Handshaking,
    Ready,
    Closing,
    Terminated,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}
