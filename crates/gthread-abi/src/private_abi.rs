//! ABI layer for thread-local private values.
//!
//! A C `GtPrivate` is laid out like [`Private`]: a slot word, the destroy
//! notify, and flags. Static initializers fill in the notify and flags and
//! leave the slot zero.

#![allow(clippy::missing_safety_doc)]

use std::ffi::c_void;
use std::ptr;

use gthread_core::Private;

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_private_get(key: *const Private) -> *mut c_void {
    // SAFETY: caller passes null or a live key.
    match unsafe { key.as_ref() } {
        Some(key) => key.get(),
        None => ptr::null_mut(),
    }
}

/// Store `value` for the calling thread without destroying the old value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_private_set(key: *const Private, value: *mut c_void) {
    // SAFETY: caller passes null or a live key.
    let Some(key) = (unsafe { key.as_ref() }) else {
        tracing::warn!(function = "gt_private_set", "null private key");
        return;
    };
    // SAFETY: the C caller owns the value contract of its destroy notify.
    unsafe { key.set(value) };
}

/// Store `value` for the calling thread and destroy the old value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_private_replace(key: *const Private, value: *mut c_void) {
    // SAFETY: caller passes null or a live key.
    let Some(key) = (unsafe { key.as_ref() }) else {
        tracing::warn!(function = "gt_private_replace", "null private key");
        return;
    };
    // SAFETY: as for `gt_private_set`.
    unsafe { key.replace(value) };
}
