//! Install holds.
//!
//! While a batch is in flight the system advertises a hold that maintenance
//! work (garbage collection, shutdown) checks before touching package state.
//! One hold unit per requested package, released exactly once per batch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct InstallHoldController {
    active: Arc<AtomicUsize>,
}

impl InstallHoldController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a hold covering `units` packages.
    #[must_use]
    pub fn acquire(&self, units: usize) -> InstallHold {
        self.active.fetch_add(units, Ordering::Relaxed);
        InstallHold {
            active: Arc::clone(&self.active),
            units,
            released: false,
        }
    }

    /// Units currently held across all in-flight batches.
    #[must_use]
    pub fn active_units(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.active_units() == 0
    }
}

/// A held unit count; returned to the controller exactly once, either
/// explicitly or on drop.
#[derive(Debug)]
pub struct InstallHold {
    active: Arc<AtomicUsize>,
    units: usize,
    released: bool,
}

impl InstallHold {
    #[must_use]
    pub fn units(&self) -> usize {
        self.units
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.active.fetch_sub(self.units, Ordering::Relaxed);
        }
    }
}

impl Drop for InstallHold {
    fn drop(&mut self) {
        self.release_inner();
    }
}
