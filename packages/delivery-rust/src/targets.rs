//! Swappable handle to the current routing snapshot.
//!
//! Uses `ArcSwap` so readers load a complete [`Targets`] snapshot without
//! locking, and the external watcher replaces it as a whole. A reader that
//! loaded a snapshot keeps using it for the rest of its call even if a newer
//! one is published meanwhile.

use std::sync::Arc;

use arc_swap::ArcSwap;
use cebroker_core::Targets;

/// Shared, atomically replaceable routing snapshot.
#[derive(Debug)]
pub struct TargetsHandle {
    current: ArcSwap<Targets>,
}

impl TargetsHandle {
    #[must_use]
    pub fn new(initial: Targets) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// Returns the current snapshot via lock-free `ArcSwap` load.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Targets> {
        self.current.load_full()
    }

    /// Publishes a new snapshot, replacing the previous one atomically.
    pub fn replace(&self, next: Targets) {
        self.current.store(Arc::new(next));
    }
}

impl Default for TargetsHandle {
    fn default() -> Self {
        Self::new(Targets::default())
    }
}
