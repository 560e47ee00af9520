use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::{ModelError, ModelResult};

/// Whether adapters may send requests to real model endpoints.
///
/// Handed to every adapter when it is built; clones share the same switch.
/// Useful to make sure tests never issue costly requests. The mock model is
/// not affected.
#[derive(Debug, Clone)]
pub struct AllowModelRequests {
    allowed: Arc<AtomicBool>,
}

impl Default for AllowModelRequests {
    fn default() -> Self {
        Self::new(true)
    }
}

impl AllowModelRequests {
    pub fn new(allowed: bool) -> Self {
        Self {
            allowed: Arc::new(AtomicBool::new(allowed)),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }

    /// Call before any network request to a provider
    pub fn check(&self) -> ModelResult<()> {
        if self.is_allowed() {
            Ok(())
        } else {
            Err(ModelError::RequestsDisabled)
        }
    }

    /// Override the switch until the returned guard is dropped, which
    /// restores the previous value (also when unwinding).
    #[must_use = "the override ends as soon as the guard is dropped"]
    pub fn override_with(&self, allowed: bool) -> OverrideGuard {
        let previous = self.allowed.swap(allowed, Ordering::SeqCst);
        OverrideGuard {
            gate: self.clone(),
            previous,
        }
    }

    /// Run `f` with the switch overridden
    pub fn with_override<T, F: FnOnce() -> T>(&self, allowed: bool, f: F) -> T {
        let _guard = self.override_with(allowed);
        f()
    }
}

pub struct OverrideGuard {
    gate: AllowModelRequests,
    previous: bool,
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        self.gate.allowed.store(self.previous, Ordering::SeqCst);
    }
}
