//! Thread lifetime beacons.
//!
//! A beacon answers "has this OS thread terminated?" without blocking and
//! without touching the thread's record, reference count, or join state.

use crate::context;

/// Backend-specific liveness probe for one OS thread.
pub trait LifetimeBeacon: Send + Sync {
    fn has_exited(&self) -> bool;
}

pub struct Beacon {
    inner: Box<dyn LifetimeBeacon>,
}

impl Beacon {
    /// Beacon for the calling thread.
    #[must_use]
    pub fn for_current_thread() -> Self {
        Self {
            inner: context::backend().beacon_new(),
        }
    }

    /// Non-blocking check of whether the thread has terminated.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.inner.has_exited()
    }
}

impl std::fmt::Debug for Beacon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Beacon")
            .field("has_exited", &self.has_exited())
            .finish()
    }
}
