//! ABI layer for thread lifecycle, lifetime beacons and the monotonic clock.
//!
//! A `GtThread *` is a counted reference to a core thread record. Functions
//! that return one hand the caller a reference, except `gt_thread_self`,
//! which borrows the calling thread's own.
//!
//! `gt_thread_exit` leaves the thread by unwinding back to the thread entry,
//! so C thread functions that call it must be built with unwind tables.

#![allow(clippy::missing_safety_doc)]

use std::ffi::{c_char, c_int, c_void};
use std::ptr;

use gthread_core::clock::monotonic_time;
use gthread_core::thread::{self, Builder, Thread};
use gthread_core::{Beacon, ThreadError};

use crate::util::{c_bool, name_from_c, store_errno};

pub type GtThreadFunc = unsafe extern "C-unwind" fn(*mut c_void) -> *mut c_void;

struct StartArgs {
    func: GtThreadFunc,
    data: *mut c_void,
}

// SAFETY: `data` is handed to the new thread exactly once, as C's
// thread-creation contract does.
unsafe impl Send for StartArgs {}

impl StartArgs {
    fn run(self) -> usize {
        // SAFETY: the caller of the spawn entry point supplied a valid
        // function for `data`.
        unsafe { (self.func)(self.data) as usize }
    }
}

/// # Safety
///
/// `name` must be null or a C string.
unsafe fn spawn_c(
    name: *const c_char,
    func: GtThreadFunc,
    data: *mut c_void,
    stack_size: usize,
    inherit_priority: bool,
) -> Result<Thread, ThreadError> {
    let mut builder = Builder::new()
        .stack_size(stack_size)
        .inherit_priority(inherit_priority);
    // SAFETY: forwarded caller contract.
    if let Some(name) = unsafe { name_from_c(name) } {
        builder = builder.name(name);
    }
    let args = StartArgs { func, data };
    builder.spawn(move || args.run())
}

/// Create a thread. Failure to create it is fatal.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_thread_new(
    name: *const c_char,
    func: Option<GtThreadFunc>,
    data: *mut c_void,
) -> *mut c_void {
    let Some(func) = func else {
        tracing::warn!(function = "gt_thread_new", "null thread function");
        return ptr::null_mut();
    };
    // SAFETY: forwarded caller contract.
    match unsafe { spawn_c(name, func, data, 0, false) } {
        Ok(thread) => thread.into_raw(),
        Err(err) => {
            // SAFETY: as above.
            let name = unsafe { name_from_c(name) };
            tracing::error!(name = name.as_deref(), error = %err, "creating thread failed; aborting");
            std::process::abort()
        }
    }
}

/// Create a thread, reporting failure as null plus an errno in `error`
/// (`EAGAIN` when retrying may succeed).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_thread_try_new(
    name: *const c_char,
    func: Option<GtThreadFunc>,
    data: *mut c_void,
    error: *mut c_int,
) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    unsafe { gt_thread_new_full(name, func, data, 0, 0, error) }
}

/// Create a thread with an explicit stack size (0 for the default) and,
/// when `inherit_priority` is non-zero, the caller's scheduler settings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_thread_new_full(
    name: *const c_char,
    func: Option<GtThreadFunc>,
    data: *mut c_void,
    stack_size: usize,
    inherit_priority: c_int,
    error: *mut c_int,
) -> *mut c_void {
    let Some(func) = func else {
        // SAFETY: caller passes null or a writable errno slot.
        unsafe { store_errno(error, libc::EINVAL) };
        return ptr::null_mut();
    };
    // SAFETY: forwarded caller contract.
    match unsafe { spawn_c(name, func, data, stack_size, inherit_priority != 0) } {
        Ok(thread) => {
            // SAFETY: as above.
            unsafe { store_errno(error, 0) };
            thread.into_raw()
        }
        Err(err) => {
            // SAFETY: as above.
            unsafe { store_errno(error, err.errno()) };
            ptr::null_mut()
        }
    }
}

/// Wait for `thread` and return its result. Consumes the caller's reference.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_thread_join(thread: *mut c_void) -> *mut c_void {
    if thread.is_null() {
        tracing::warn!(function = "gt_thread_join", "null thread");
        return ptr::null_mut();
    }
    // SAFETY: the caller hands over one reference.
    let thread = unsafe { Thread::from_raw(thread) };
    thread.join() as *mut c_void
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_thread_ref(thread: *mut c_void) -> *mut c_void {
    if !thread.is_null() {
        // SAFETY: the caller holds a reference, so the record is live.
        unsafe { Thread::increment_ref_count(thread) };
    }
    thread
}

/// Drop a reference. Dropping the last one without joining detaches.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_thread_unref(thread: *mut c_void) {
    if !thread.is_null() {
        // SAFETY: the caller hands over one reference.
        unsafe { Thread::from_raw(thread) }.detach();
    }
}

/// The calling thread, borrowed: do not unref it.
#[unsafe(no_mangle)]
pub extern "C" fn gt_thread_self() -> *mut c_void {
    let me = Thread::current();
    let ptr = me.as_ptr();
    if me.ref_count() > 1 {
        // The thread's own reference keeps the record alive.
        drop(me);
    } else {
        // Thread-locals are already gone; keep the record for the caller.
        let _ = me.into_raw();
    }
    ptr
}

/// Terminate the calling thread; `retval` becomes its join result.
#[unsafe(no_mangle)]
pub extern "C-unwind" fn gt_thread_exit(retval: *mut c_void) -> ! {
    thread::exit(retval as usize)
}

#[unsafe(no_mangle)]
pub extern "C" fn gt_thread_yield() {
    thread::yield_now();
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_thread_set_name(name: *const c_char) {
    // SAFETY: caller passes null or a C string.
    if let Some(name) = unsafe { name_from_c(name) } {
        thread::set_name(&name);
    }
}

// ---------------------------------------------------------------------------
// Lifetime beacons
// ---------------------------------------------------------------------------

/// Beacon for the calling thread. Free with
/// `gt_thread_lifetime_beacon_free`.
#[unsafe(no_mangle)]
pub extern "C" fn gt_thread_lifetime_beacon_new() -> *mut Beacon {
    Box::into_raw(Box::new(Beacon::for_current_thread()))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_thread_lifetime_beacon_free(beacon: *mut Beacon) {
    if !beacon.is_null() {
        // SAFETY: `beacon` came from `gt_thread_lifetime_beacon_new`.
        drop(unsafe { Box::from_raw(beacon) });
    }
}

/// Returns 1 once the beacon's thread has terminated, 0 while it runs.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_thread_lifetime_beacon_check(beacon: *const Beacon) -> c_int {
    // SAFETY: caller passes null or a live beacon.
    match unsafe { beacon.as_ref() } {
        Some(beacon) => c_bool(beacon.has_exited()),
        None => {
            tracing::warn!(function = "gt_thread_lifetime_beacon_check", "null beacon");
            0
        }
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Microseconds on the monotonic clock used by `gt_cond_wait_until`.
#[unsafe(no_mangle)]
pub extern "C" fn gt_get_monotonic_time() -> i64 {
    monotonic_time()
}
