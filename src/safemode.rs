//! C10 — safe mode: a manual override that suspends auto-heal and injection
//! without tearing down existing state (§4.10).
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

/// Tracks whether safe mode is active. While active, the heal supervisor
/// must not be enqueued against and the watcher's change batches are
/// observed but not acted upon (§4.10 "monitoring continues to observe, but
/// no mutating action is taken").
#[derive(Debug, Default)]
pub struct SafeMode {
    active: AtomicBool,
}

impl SafeMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
        info!("safe mode activated");
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        info!("safe mode deactivated");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Sets the flag directly to `active`, used when restoring state from
    /// the persisted `settings.safeModeActive` on startup or after a
    /// manifest reload (§4.10).
    pub fn set(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}
