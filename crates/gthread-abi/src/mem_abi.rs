//! ABI layer for the allocation vtable and the allocation entry points that
//! go through it.

#![allow(clippy::missing_safety_doc)]

use std::ffi::{c_int, c_void};

use gthread_core::mem::{self, CallocFn, FreeFn, MallocFn, MemVTable, ReallocFn};

/// C view of the allocation vtable. `malloc`, `realloc` and `free` are
/// required; `calloc` may be null.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GtMemVTable {
    pub malloc: Option<MallocFn>,
    pub realloc: Option<ReallocFn>,
    pub free: Option<FreeFn>,
    pub calloc: Option<CallocFn>,
}

impl GtMemVTable {
    fn to_core(self) -> Option<MemVTable> {
        Some(MemVTable {
            malloc: self.malloc?,
            realloc: self.realloc?,
            free: self.free?,
            calloc: self.calloc,
        })
    }
}

/// Install the allocator used for every object this layer allocates.
///
/// Returns 0 on success, `EINVAL` if the table is null or lacks a required
/// entry, and `EBUSY` if an allocator is already in use.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_mem_set_vtable(vtable: *const GtMemVTable) -> c_int {
    // SAFETY: caller passes null or a readable table.
    let Some(table) = (unsafe { vtable.as_ref() }).and_then(|t| t.to_core()) else {
        tracing::warn!("allocation vtable rejected: missing required entry");
        return libc::EINVAL;
    };
    match mem::set_mem_vtable(table) {
        Ok(()) => 0,
        Err(_) => libc::EBUSY,
    }
}

/// Allocate `size` bytes; null for zero. Allocation failure is fatal.
#[unsafe(no_mangle)]
pub extern "C" fn gt_malloc(size: usize) -> *mut c_void {
    mem::malloc(size)
}

/// Allocate `size` zeroed bytes; null for zero.
#[unsafe(no_mangle)]
pub extern "C" fn gt_malloc0(size: usize) -> *mut c_void {
    mem::calloc(1, size)
}

/// Allocate `size` bytes, returning null on failure instead of aborting.
#[unsafe(no_mangle)]
pub extern "C" fn gt_try_malloc(size: usize) -> *mut c_void {
    mem::try_malloc(size)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: caller passes null or a pointer from this allocator.
    unsafe { mem::realloc(ptr, size) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_free(ptr: *mut c_void) {
    // SAFETY: caller passes null or a pointer from this allocator.
    unsafe { mem::free(ptr) };
}
