//! Initialize-once backing cells and the registries that track them.
//!
//! A [`LazyBox`] is a pointer-sized, zero-initializable slot embedded in a
//! primitive. The first real use allocates the backing object through the
//! allocation vtable and publishes it with a compare-exchange performed under
//! the owning registry's lock. A thread that loses the race frees its copy, so
//! exactly one allocation survives per slot.

#![allow(unsafe_code)]

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use parking_lot::Mutex;

use crate::context::{self, ThreadContext};
use crate::mem;
use crate::metrics::{ThreadMetrics, global_metrics};

/// Object type held by a [`LazyBox`].
pub(crate) trait Backing: Sized + Send + Sync {
    fn create() -> Self;

    /// Registry that tracks live backing objects of this type.
    fn registry(ctx: &ThreadContext) -> &Registry<BackingPtr<Self>>;
}

/// Registry entry for a vtable-allocated backing object.
pub(crate) struct BackingPtr<T>(pub(crate) NonNull<T>);

impl<T> Clone for BackingPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BackingPtr<T> {}

impl<T> PartialEq for BackingPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

// SAFETY: backing objects are `Send + Sync` (see `Backing`), and the pointer
// is only dereferenced by the slot that published it or by deinit.
unsafe impl<T: Send + Sync> Send for BackingPtr<T> {}
// SAFETY: as above.
unsafe impl<T: Send + Sync> Sync for BackingPtr<T> {}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Process-wide list of live entries, drained at deinit.
pub(crate) struct Registry<E> {
    entries: Mutex<Vec<E>>,
}

impl<E: Copy + PartialEq> Registry<E> {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Run `f` with the registry lock held.
    pub(crate) fn with_locked<R>(&self, f: impl FnOnce(&mut Vec<E>) -> R) -> R {
        f(&mut self.entries.lock())
    }

    pub(crate) fn register(&self, entry: E) {
        self.entries.lock().push(entry);
    }

    /// Remove `entry`. Returns `false` if it was not registered.
    pub(crate) fn unregister(&self, entry: E) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|e| *e == entry) {
            Some(idx) => {
                entries.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    pub(crate) fn drain(&self) -> Vec<E> {
        std::mem::take(&mut *self.entries.lock())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

// ---------------------------------------------------------------------------
// LazyBox
// ---------------------------------------------------------------------------

#[repr(transparent)]
pub(crate) struct LazyBox<T: Backing> {
    ptr: AtomicPtr<T>,
}

impl<T: Backing> LazyBox<T> {
    pub(crate) const fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// The backing object, if one has been published.
    pub(crate) fn get(&self) -> Option<&T> {
        // SAFETY: a published pointer stays valid until `take_and_free`
        // (which needs `&mut self`) or deinit.
        NonNull::new(self.ptr.load(Ordering::Acquire)).map(|p| unsafe { &*p.as_ptr() })
    }

    #[inline]
    pub(crate) fn get_or_init(&self) -> &T {
        match self.get() {
            Some(backing) => backing,
            None => self.init_slow(),
        }
    }

    #[cold]
    fn init_slow(&self) -> &T {
        let fresh = mem::alloc_value(T::create());
        let published = context::with(|ctx| {
            T::registry(ctx).with_locked(|entries| {
                match self.ptr.compare_exchange(
                    ptr::null_mut(),
                    fresh.as_ptr(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        entries.push(BackingPtr(fresh));
                        Ok(fresh)
                    }
                    Err(winner) => Err(winner),
                }
            })
        });
        let winner = match published {
            Ok(ours) => {
                ThreadMetrics::inc(&global_metrics().lazy_allocations);
                ours
            }
            Err(winner) => {
                // SAFETY: `fresh` was never published.
                unsafe { mem::free_value(fresh) };
                ThreadMetrics::inc(&global_metrics().lazy_discards);
                // SAFETY: the CAS observed a non-null published pointer.
                unsafe { NonNull::new_unchecked(winner) }
            }
        };
        // SAFETY: the published pointer is live until cleared.
        unsafe { &*winner.as_ptr() }
    }

    /// Unpublish and free the backing object.
    ///
    /// Nothing is freed if deinit already drained it from the registry.
    pub(crate) fn take_and_free(&mut self) {
        let Some(backing) = NonNull::new(self.ptr.swap(ptr::null_mut(), Ordering::AcqRel)) else {
            return;
        };
        let owned = context::with_existing(|ctx| T::registry(ctx).unregister(BackingPtr(backing)))
            .unwrap_or(false);
        if owned {
            // SAFETY: the registry held the only other reference and it has
            // just been removed.
            unsafe { mem::free_value(backing) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_register_unregister_drain() {
        let reg: Registry<usize> = Registry::new();
        reg.register(1);
        reg.register(2);
        reg.register(3);
        assert!(reg.unregister(2));
        assert!(!reg.unregister(2));
        assert_eq!(reg.len(), 2);
        let mut drained = reg.drain();
        drained.sort_unstable();
        assert_eq!(drained, vec![1, 3]);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn with_locked_sees_registered_entries() {
        let reg: Registry<usize> = Registry::new();
        reg.register(9);
        let seen = reg.with_locked(|entries| entries.contains(&9));
        assert!(seen);
    }
}
