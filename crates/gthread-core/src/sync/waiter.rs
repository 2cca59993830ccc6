//! Per-thread waiter nodes for the emulated primitives.
//!
//! Each thread lazily allocates one node through the allocation vtable and
//! keeps it in a destroy-last private, so it outlives every other private
//! value the thread owns and is freed exactly once on exit.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::ptr::NonNull;

use crate::futex::Event;
use crate::mem;
use crate::metrics::{ThreadMetrics, global_metrics};
use crate::private::{PRIVATE_DESTROY_LAST, Private};

pub(crate) struct Waiter {
    pub(crate) event: Event,
}

/// Stable handle to a thread's waiter node.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaiterRef(NonNull<Waiter>);

// SAFETY: a waiter lives until its thread exits, and the thread is blocked
// on it for as long as any queue holds the handle.
unsafe impl Send for WaiterRef {}

impl WaiterRef {
    pub(crate) fn event(&self) -> &Event {
        // SAFETY: see the `Send` impl.
        unsafe { &self.0.as_ref().event }
    }
}

unsafe extern "C" fn waiter_free(waiter: *mut c_void) {
    if let Some(waiter) = NonNull::new(waiter.cast::<Waiter>()) {
        // SAFETY: only nodes from `current` are stored under WAITER_KEY.
        unsafe { mem::free_value(waiter) };
    }
}

static WAITER_KEY: Private = Private::with_flags(Some(waiter_free), PRIVATE_DESTROY_LAST);

/// The calling thread's waiter node.
pub(crate) fn current() -> WaiterRef {
    if let Some(waiter) = NonNull::new(WAITER_KEY.get().cast::<Waiter>()) {
        return WaiterRef(waiter);
    }
    let waiter = mem::alloc_value(Waiter {
        event: Event::new(),
    });
    ThreadMetrics::inc(&global_metrics().waiter_allocations);
    // SAFETY: `waiter` is a fresh node that `waiter_free` may release.
    unsafe { WAITER_KEY.set(waiter.as_ptr().cast()) };
    WaiterRef(waiter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn node_is_reused_within_a_thread() {
        let a = current();
        let b = current();
        assert!(a == b);
    }

    #[test]
    fn threads_get_distinct_nodes() {
        let here = current().0.as_ptr() as usize;
        let there = thread::spawn(|| current().0.as_ptr() as usize)
            .join()
            .unwrap();
        assert_ne!(here, there);
    }
}
