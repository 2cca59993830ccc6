//! Recursive mutex with lazily allocated backing.

#![allow(unsafe_code)]

use parking_lot::lock_api::RawReentrantMutex;
use parking_lot::{RawMutex, RawThreadId};

use crate::context::ThreadContext;
use crate::lazy::{Backing, BackingPtr, LazyBox, Registry};

pub(crate) type RecMutexImpl = RawReentrantMutex<RawMutex, RawThreadId>;

impl Backing for RecMutexImpl {
    fn create() -> Self {
        Self::INIT
    }

    fn registry(ctx: &ThreadContext) -> &Registry<BackingPtr<Self>> {
        &ctx.rec_mutexes
    }
}

/// A mutex the owning thread may lock repeatedly; each `lock` needs a
/// matching `unlock`.
///
/// Nothing is allocated until the first lock. The all-zero value is a valid
/// unlocked recursive mutex.
#[repr(C)]
pub struct RecMutex {
    inner: LazyBox<RecMutexImpl>,
}

impl RecMutex {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: LazyBox::new(),
        }
    }

    pub fn lock(&self) {
        self.inner.get_or_init().lock();
    }

    #[must_use]
    pub fn try_lock(&self) -> bool {
        self.inner.get_or_init().try_lock()
    }

    /// # Panics
    ///
    /// Panics if the calling thread does not hold the lock.
    pub fn unlock(&self) {
        let held = self
            .inner
            .get()
            .filter(|backing| backing.is_owned_by_current_thread());
        let Some(backing) = held else {
            panic!("RecMutex::unlock() called by a thread that does not hold it");
        };
        // SAFETY: the calling thread owns the lock.
        unsafe { backing.unlock() };
    }

    /// Free the backing object. The mutex may be locked again afterwards.
    pub fn clear(&mut self) {
        self.inner.take_and_free();
    }
}

impl Default for RecMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RecMutex {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for RecMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecMutex")
            .field("allocated", &self.inner.get().is_some())
            .finish()
    }
}
