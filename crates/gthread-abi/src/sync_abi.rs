//! ABI layer for mutexes, recursive mutexes, reader-writer locks and
//! condition variables.
//!
//! C callers embed the `#[repr(C)]` core types directly. An all-zero object
//! is valid, so `*_init` is only required for memory that is not zeroed.
//! A null object pointer is rejected with a warning and the call does
//! nothing (trylock and timed-wait calls report failure).

#![allow(clippy::missing_safety_doc)]

use std::ffi::c_int;
use std::ptr;

use gthread_core::clock::deadline_from_monotonic;
use gthread_core::{Cond, Mutex, RecMutex, RwLock};

use crate::util::c_bool;

#[cold]
fn null_object(function: &'static str) {
    tracing::warn!(function, "null synchronization object");
}

/// Borrow a shared object, or log and return `None` for null.
///
/// # Safety
///
/// A non-null `p` must point to a live, initialized object.
unsafe fn shared<'a, T>(p: *const T, function: &'static str) -> Option<&'a T> {
    // SAFETY: caller guarantees validity of non-null pointers.
    let obj = unsafe { p.as_ref() };
    if obj.is_none() {
        null_object(function);
    }
    obj
}

/// # Safety
///
/// As for [`shared`], and no other thread may be using the object.
unsafe fn exclusive<'a, T>(p: *mut T, function: &'static str) -> Option<&'a mut T> {
    // SAFETY: caller guarantees validity and exclusivity.
    let obj = unsafe { p.as_mut() };
    if obj.is_none() {
        null_object(function);
    }
    obj
}

// ---------------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_mutex_init(mutex: *mut Mutex) {
    if mutex.is_null() {
        return null_object("gt_mutex_init");
    }
    // SAFETY: non-null caller storage for a `Mutex`.
    unsafe { ptr::write(mutex, Mutex::new()) };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_mutex_clear(mutex: *mut Mutex) {
    // The futex word owns no resources; clearing only validates the handle.
    // SAFETY: forwarded caller contract.
    let _ = unsafe { exclusive(mutex, "gt_mutex_clear") };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_mutex_lock(mutex: *mut Mutex) {
    // SAFETY: forwarded caller contract.
    if let Some(m) = unsafe { shared(mutex, "gt_mutex_lock") } {
        m.lock();
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_mutex_trylock(mutex: *mut Mutex) -> c_int {
    // SAFETY: forwarded caller contract.
    unsafe { shared(mutex, "gt_mutex_trylock") }.map_or(0, |m| c_bool(m.try_lock()))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_mutex_unlock(mutex: *mut Mutex) {
    // SAFETY: forwarded caller contract.
    if let Some(m) = unsafe { shared(mutex, "gt_mutex_unlock") } {
        m.unlock();
    }
}

// ---------------------------------------------------------------------------
// Recursive mutex
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_rec_mutex_init(mutex: *mut RecMutex) {
    if mutex.is_null() {
        return null_object("gt_rec_mutex_init");
    }
    // SAFETY: non-null caller storage; any previous backing is the caller's
    // to clear first.
    unsafe { ptr::write(mutex, RecMutex::new()) };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_rec_mutex_clear(mutex: *mut RecMutex) {
    // SAFETY: forwarded caller contract.
    if let Some(m) = unsafe { exclusive(mutex, "gt_rec_mutex_clear") } {
        m.clear();
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_rec_mutex_lock(mutex: *mut RecMutex) {
    // SAFETY: forwarded caller contract.
    if let Some(m) = unsafe { shared(mutex, "gt_rec_mutex_lock") } {
        m.lock();
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_rec_mutex_trylock(mutex: *mut RecMutex) -> c_int {
    // SAFETY: forwarded caller contract.
    unsafe { shared(mutex, "gt_rec_mutex_trylock") }.map_or(0, |m| c_bool(m.try_lock()))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_rec_mutex_unlock(mutex: *mut RecMutex) {
    // SAFETY: forwarded caller contract.
    if let Some(m) = unsafe { shared(mutex, "gt_rec_mutex_unlock") } {
        m.unlock();
    }
}

// ---------------------------------------------------------------------------
// Reader-writer lock
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_rw_lock_init(lock: *mut RwLock) {
    if lock.is_null() {
        return null_object("gt_rw_lock_init");
    }
    // SAFETY: non-null caller storage.
    unsafe { ptr::write(lock, RwLock::new()) };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_rw_lock_clear(lock: *mut RwLock) {
    // SAFETY: forwarded caller contract.
    if let Some(l) = unsafe { exclusive(lock, "gt_rw_lock_clear") } {
        l.clear();
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_rw_lock_writer_lock(lock: *mut RwLock) {
    // SAFETY: forwarded caller contract.
    if let Some(l) = unsafe { shared(lock, "gt_rw_lock_writer_lock") } {
        l.writer_lock();
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_rw_lock_writer_trylock(lock: *mut RwLock) -> c_int {
    // SAFETY: forwarded caller contract.
    unsafe { shared(lock, "gt_rw_lock_writer_trylock") }.map_or(0, |l| c_bool(l.writer_trylock()))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_rw_lock_writer_unlock(lock: *mut RwLock) {
    // SAFETY: forwarded caller contract.
    if let Some(l) = unsafe { shared(lock, "gt_rw_lock_writer_unlock") } {
        l.writer_unlock();
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_rw_lock_reader_lock(lock: *mut RwLock) {
    // SAFETY: forwarded caller contract.
    if let Some(l) = unsafe { shared(lock, "gt_rw_lock_reader_lock") } {
        l.reader_lock();
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_rw_lock_reader_trylock(lock: *mut RwLock) -> c_int {
    // SAFETY: forwarded caller contract.
    unsafe { shared(lock, "gt_rw_lock_reader_trylock") }.map_or(0, |l| c_bool(l.reader_trylock()))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_rw_lock_reader_unlock(lock: *mut RwLock) {
    // SAFETY: forwarded caller contract.
    if let Some(l) = unsafe { shared(lock, "gt_rw_lock_reader_unlock") } {
        l.reader_unlock();
    }
}

// ---------------------------------------------------------------------------
// Condition variable
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_cond_init(cond: *mut Cond) {
    if cond.is_null() {
        return null_object("gt_cond_init");
    }
    // SAFETY: non-null caller storage.
    unsafe { ptr::write(cond, Cond::new()) };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_cond_clear(cond: *mut Cond) {
    // SAFETY: forwarded caller contract.
    if let Some(c) = unsafe { exclusive(cond, "gt_cond_clear") } {
        c.clear();
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_cond_wait(cond: *mut Cond, mutex: *mut Mutex) {
    // SAFETY: forwarded caller contract.
    let (Some(c), Some(m)) = (unsafe { shared(cond, "gt_cond_wait") }, unsafe {
        shared(mutex, "gt_cond_wait")
    }) else {
        return;
    };
    c.wait(m);
}

/// Wait until signalled or until the monotonic clock (see
/// `gt_get_monotonic_time`) reaches `end_time` microseconds. Returns 1 when
/// signalled, 0 on timeout; `mutex` is held again either way.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_cond_wait_until(cond: *mut Cond, mutex: *mut Mutex, end_time: i64) -> c_int {
    // SAFETY: forwarded caller contract.
    let (Some(c), Some(m)) = (unsafe { shared(cond, "gt_cond_wait_until") }, unsafe {
        shared(mutex, "gt_cond_wait_until")
    }) else {
        return 0;
    };
    c_bool(c.wait_until(m, deadline_from_monotonic(end_time)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_cond_signal(cond: *mut Cond) {
    // SAFETY: forwarded caller contract.
    if let Some(c) = unsafe { shared(cond, "gt_cond_signal") } {
        c.signal();
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_cond_broadcast(cond: *mut Cond) {
    // SAFETY: forwarded caller contract.
    if let Some(c) = unsafe { shared(cond, "gt_cond_broadcast") } {
        c.broadcast();
    }
}
