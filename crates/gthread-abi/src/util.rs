//! Shared internal utilities for ABI adapters.

use std::ffi::{c_char, c_int};

/// Longest thread name accepted from C, in bytes.
pub(crate) const MAX_NAME_BYTES: usize = 4096;

/// Scan a C string with an optional hard bound.
///
/// Returns `(len, terminated)` where `len` is the byte length before the
/// first NUL or before the bound.
///
/// # Safety
///
/// `ptr` must be valid to read up to the discovered length (and bound when
/// given).
pub(crate) unsafe fn scan_c_string(ptr: *const c_char, bound: Option<usize>) -> (usize, bool) {
    let limit = bound.unwrap_or(usize::MAX);
    let mut i = 0usize;
    while i < limit {
        // SAFETY: caller guarantees readability up to the terminator/bound.
        if unsafe { *ptr.add(i) } == 0 {
            return (i, true);
        }
        i += 1;
    }
    (limit, false)
}

/// Copy an optional C name into an owned string, replacing invalid UTF-8.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string (or at least
/// [`MAX_NAME_BYTES`] readable bytes).
pub(crate) unsafe fn name_from_c(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: forwarded caller contract.
    let (len, _) = unsafe { scan_c_string(ptr, Some(MAX_NAME_BYTES)) };
    // SAFETY: `len` bytes were just read.
    let bytes = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) };
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// Store `value` through an optional errno out-parameter.
///
/// # Safety
///
/// `out` must be null or valid for a write.
pub(crate) unsafe fn store_errno(out: *mut c_int, value: c_int) {
    if !out.is_null() {
        // SAFETY: caller guarantees `out` is writable.
        unsafe { *out = value };
    }
}

pub(crate) const fn c_bool(value: bool) -> c_int {
    value as c_int
}
