//! Allocation vtable.
//!
//! Every heap object this layer owns (recursive-mutex backing, emulated
//! reader-writer lock and condition backing, waiter nodes, thread records)
//! is allocated through the process-wide [`MemVTable`]. The vtable defaults to
//! the C library allocator and may be replaced exactly once, before anything
//! has been allocated through it.

#![allow(unsafe_code)]

use std::alloc::{Layout, handle_alloc_error};
use std::ffi::c_void;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

use crate::error::MemVTableError;

pub type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
pub type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
pub type FreeFn = unsafe extern "C" fn(*mut c_void);
pub type CallocFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;

/// Alignment every vtable allocator must provide.
pub const MIN_ALIGN: usize = 2 * size_of::<usize>();

/// Allocator entry points. `calloc` is optional and falls back to
/// `malloc` followed by zero-fill.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MemVTable {
    pub malloc: MallocFn,
    pub realloc: ReallocFn,
    pub free: FreeFn,
    pub calloc: Option<CallocFn>,
}

impl MemVTable {
    /// The C library allocator.
    #[must_use]
    pub const fn system() -> Self {
        Self {
            malloc: libc::malloc,
            realloc: libc::realloc,
            free: libc::free,
            calloc: Some(libc::calloc),
        }
    }
}

impl Default for MemVTable {
    fn default() -> Self {
        Self::system()
    }
}

static VTABLE: OnceLock<MemVTable> = OnceLock::new();

/// Install `vtable` as the allocator for this layer.
///
/// Fails if a vtable was already installed or if the layer has already
/// allocated through the default one.
pub fn set_mem_vtable(vtable: MemVTable) -> Result<(), MemVTableError> {
    VTABLE.set(vtable).map_err(|_| {
        tracing::warn!("allocation vtable offered after first use; keeping the current one");
        MemVTableError::AlreadySet
    })
}

/// The active vtable. The first call freezes the choice.
#[must_use]
pub fn mem_vtable() -> MemVTable {
    *VTABLE.get_or_init(MemVTable::system)
}

#[cold]
fn alloc_failure(size: usize) -> ! {
    let layout = Layout::from_size_align(size.max(1), 1).unwrap_or_else(|_| Layout::new::<u8>());
    handle_alloc_error(layout)
}

// ---------------------------------------------------------------------------
// Byte allocation
// ---------------------------------------------------------------------------

/// Allocate `size` bytes, returning null on failure or when `size` is zero.
#[must_use]
pub fn try_malloc(size: usize) -> *mut c_void {
    if size == 0 {
        return ptr::null_mut();
    }
    // SAFETY: the vtable's malloc accepts any size.
    unsafe { (mem_vtable().malloc)(size) }
}

/// Allocate `size` bytes. Allocation failure is fatal. Zero bytes yields null.
#[must_use]
pub fn malloc(size: usize) -> *mut c_void {
    let p = try_malloc(size);
    if p.is_null() && size != 0 {
        alloc_failure(size);
    }
    p
}

/// Allocate `n * size` zeroed bytes. Overflow and allocation failure are fatal.
#[must_use]
pub fn calloc(n: usize, size: usize) -> *mut c_void {
    let Some(total) = n.checked_mul(size) else {
        alloc_failure(usize::MAX);
    };
    if total == 0 {
        return ptr::null_mut();
    }
    let table = mem_vtable();
    let p = match table.calloc {
        // SAFETY: the vtable's calloc accepts any element count and size.
        Some(calloc) => unsafe { calloc(n, size) },
        None => {
            // SAFETY: as for `try_malloc`.
            let p = unsafe { (table.malloc)(total) };
            if !p.is_null() {
                // SAFETY: `p` points to `total` freshly allocated bytes.
                unsafe { ptr::write_bytes(p.cast::<u8>(), 0, total) };
            }
            p
        }
    };
    if p.is_null() {
        alloc_failure(total);
    }
    p
}

/// Resize an allocation. A zero `size` frees `mem` and returns null.
///
/// # Safety
///
/// `mem` must be null or a live pointer returned by this module.
#[must_use]
pub unsafe fn realloc(mem: *mut c_void, size: usize) -> *mut c_void {
    let table = mem_vtable();
    if size == 0 {
        if !mem.is_null() {
            // SAFETY: caller guarantees `mem` came from this allocator.
            unsafe { (table.free)(mem) };
        }
        return ptr::null_mut();
    }
    // SAFETY: caller guarantees `mem` is null or came from this allocator.
    let p = unsafe { (table.realloc)(mem, size) };
    if p.is_null() {
        alloc_failure(size);
    }
    p
}

/// Release an allocation. Null is ignored.
///
/// # Safety
///
/// `mem` must be null or a live pointer returned by this module.
pub unsafe fn free(mem: *mut c_void) {
    if !mem.is_null() {
        // SAFETY: caller guarantees `mem` came from this allocator.
        unsafe { (mem_vtable().free)(mem) };
    }
}

// ---------------------------------------------------------------------------
// Typed objects
// ---------------------------------------------------------------------------

/// Move `value` into a vtable allocation.
pub(crate) fn alloc_value<T>(value: T) -> NonNull<T> {
    const { assert!(align_of::<T>() <= MIN_ALIGN) };
    let size = size_of::<T>().max(1);
    // SAFETY: `size` is non-zero.
    let raw = unsafe { (mem_vtable().malloc)(size) }.cast::<T>();
    let Some(slot) = NonNull::new(raw) else {
        handle_alloc_error(Layout::new::<T>());
    };
    // SAFETY: `slot` is a fresh allocation of at least `size_of::<T>()`
    // bytes with alignment `MIN_ALIGN`.
    unsafe { slot.as_ptr().write(value) };
    slot
}

/// Drop and release an object created by [`alloc_value`].
///
/// # Safety
///
/// `slot` must come from `alloc_value::<T>` and must not be used again.
pub(crate) unsafe fn free_value<T>(slot: NonNull<T>) {
    // SAFETY: caller guarantees `slot` holds a live `T` we own.
    unsafe {
        ptr::drop_in_place(slot.as_ptr());
        (mem_vtable().free)(slot.as_ptr().cast());
    }
}
