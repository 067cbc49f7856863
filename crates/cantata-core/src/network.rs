//! Scoped network kill switch.
//!
//! Code that must never touch the network (archive generation from local
//! working trees) disables the switch for its scope; any upstream fetch that
//! consults the switch in the meantime fails with
//! [`Error::NetworkDisabled`](crate::Error::NetworkDisabled).

use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::error;

/// Shared network toggle.
///
/// Disabling is counted, so nested guards compose. A switch created with
/// [`NetworkSwitch::fork`] sees its parent's state but its own guards do not
/// leak into the parent.
#[derive(Debug, Clone, Default)]
pub struct NetworkSwitch {
    depth: Arc<AtomicUsize>,
    parent: Option<Arc<AtomicUsize>>,
}

impl NetworkSwitch {
    /// Create an enabled switch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a switch that starts disabled and stays so for its lifetime.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            depth: Arc::new(AtomicUsize::new(1)),
            parent: None,
        }
    }

    /// Child switch for one task.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            depth: Arc::new(AtomicUsize::new(0)),
            parent: Some(Arc::clone(&self.depth)),
        }
    }

    /// Whether network access is currently allowed.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.depth.load(Ordering::SeqCst) == 0
            && self
                .parent
                .as_ref()
                .is_none_or(|p| p.load(Ordering::SeqCst) == 0)
    }

    /// Disable network access until the returned guard is dropped.
    #[must_use = "network is re-enabled as soon as the guard is dropped"]
    pub fn disable(&self) -> NetworkGuard {
        self.depth.fetch_add(1, Ordering::SeqCst);
        NetworkGuard {
            depth: Arc::clone(&self.depth),
        }
    }

    /// Fail if network access is disabled.
    ///
    /// # Errors
    /// Returns [`Error::NetworkDisabled`] while any guard is alive.
    pub fn ensure_enabled(&self, url: &str) -> Result<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            error!(url, "network request attempted while network is disabled");
            Err(Error::network_disabled(url))
        }
    }
}

/// Keeps the network disabled while alive.
#[derive(Debug)]
pub struct NetworkGuard {
    depth: Arc<AtomicUsize>,
}

impl Drop for NetworkGuard {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_disables_for_its_scope() {
        let switch = NetworkSwitch::new();
        assert!(switch.ensure_enabled("https://example.com").is_ok());
        {
            let _guard = switch.disable();
            let err = switch.ensure_enabled("https://example.com").unwrap_err();
            assert!(err.is_network_disabled());
        }
        assert!(switch.is_enabled());
    }

    #[test]
    fn nested_guards() {
        let switch = NetworkSwitch::new();
        let outer = switch.disable();
        let inner = switch.disable();
        drop(inner);
        assert!(!switch.is_enabled());
        drop(outer);
        assert!(switch.is_enabled());
    }

    #[test]
    fn guard_released_on_panic() {
        let switch = NetworkSwitch::new();
        let cloned = switch.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = cloned.disable();
            panic!("archive extraction failed");
        });
        assert!(result.is_err());
        assert!(switch.is_enabled());
    }

    #[test]
    fn fork_sees_parent_but_not_vice_versa() {
        let parent = NetworkSwitch::new();
        let child = parent.fork();

        let child_guard = child.disable();
        assert!(!child.is_enabled());
        assert!(parent.is_enabled());
        drop(child_guard);

        let _parent_guard = parent.disable();
        assert!(!child.is_enabled());
    }

    #[test]
    fn offline_switch() {
        assert!(!NetworkSwitch::offline().is_enabled());
    }
}
