//! Current key id tracking.

use std::sync::Arc;

use arc_swap::ArcSwap;

/// Lock-free cell holding the most recently used key id.
///
/// Readers never block writers and always see a complete value. Wrappers
/// store into it during `set_config` and after each successful encrypt,
/// never on decrypt.
#[derive(Debug)]
pub struct KeyIdCell {
    current: ArcSwap<String>,
}

impl KeyIdCell {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(String::new()),
        }
    }

    /// Current key id; empty before the wrapper is configured.
    pub fn load(&self) -> String {
        self.current.load().as_ref().clone()
    }

    pub fn store(&self, key_id: impl Into<String>) {
        self.current.store(Arc::new(key_id.into()));
    }
}

impl Default for KeyIdCell {
    fn default() -> Self {
        Self::new()
    }
}
