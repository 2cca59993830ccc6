//! Host-supplied thread backend given as a C function-pointer table.
//!
//! The table is copied and wrapped in [`CBackend`], which implements the core
//! backend trait. A null entry for a required operation is only reported when
//! that operation is first invoked, as a missing-implementation panic.

#![allow(clippy::missing_safety_doc)]

use std::ffi::{CString, c_char, c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use gthread_core::backend::ThreadEntry;
use gthread_core::{Config, LifetimeBeacon, SpawnRequest, SystemThread, ThreadBackend, ThreadError};

/// Trampoline the host must call on the new thread with the `data` it was
/// given by `create`.
pub type GtThreadEntry = unsafe extern "C" fn(*mut c_void);

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GtThreadBackendVTable {
    /// Start a thread running `entry(data)`. Stores an opaque handle in
    /// `*handle_out` and returns 0, or returns an errno without starting it.
    pub create: Option<
        unsafe extern "C" fn(
            entry: GtThreadEntry,
            data: *mut c_void,
            name: *const c_char,
            stack_size: usize,
            handle_out: *mut *mut c_void,
        ) -> c_int,
    >,
    pub detach: Option<unsafe extern "C" fn(handle: *mut c_void)>,
    pub wait: Option<unsafe extern "C" fn(handle: *mut c_void)>,
    /// Must not return.
    pub exit_current: Option<unsafe extern "C-unwind" fn()>,
    pub set_name: Option<unsafe extern "C" fn(name: *const c_char)>,
    pub yield_now: Option<unsafe extern "C" fn()>,
    /// Opaque beacon for the calling thread.
    pub beacon_new: Option<unsafe extern "C" fn() -> *mut c_void>,
    /// Non-zero once the beacon's thread has exited.
    pub beacon_check: Option<unsafe extern "C" fn(beacon: *mut c_void) -> c_int>,
    pub beacon_free: Option<unsafe extern "C" fn(beacon: *mut c_void)>,
}

/// Panic for a required entry the host left null.
#[cold]
fn missing(operation: &'static str) -> ! {
    tracing::error!(operation, "host thread backend is missing a required operation");
    panic!("thread backend does not implement `{operation}`");
}

fn c_name(name: &str) -> CString {
    let bytes: Vec<u8> = name.bytes().take_while(|b| *b != 0).collect();
    CString::new(bytes).unwrap_or_default()
}

struct CHandle(*mut c_void);

// SAFETY: host handles are plain tokens passed back to the host from
// whichever thread joins or detaches.
unsafe impl Send for CHandle {}

fn handle(thread: SystemThread) -> *mut c_void {
    match thread.downcast::<CHandle>() {
        Ok(handle) => handle.0,
        Err(_) => panic!("host backend asked to handle a foreign thread handle"),
    }
}

unsafe extern "C" fn run_entry(data: *mut c_void) {
    // SAFETY: `data` is the box leaked by `CBackend::create`, passed back
    // exactly once by the host.
    let entry = *unsafe { Box::from_raw(data.cast::<ThreadEntry>()) };
    if panic::catch_unwind(AssertUnwindSafe(entry)).is_err() {
        tracing::error!("panic escaped a thread started by the host backend; aborting");
        std::process::abort();
    }
}

struct CBeacon {
    token: *mut c_void,
    check: unsafe extern "C" fn(*mut c_void) -> c_int,
    free: Option<unsafe extern "C" fn(*mut c_void)>,
}

// SAFETY: the host's beacon functions may be called from any thread.
unsafe impl Send for CBeacon {}
// SAFETY: as above; `check` only reads.
unsafe impl Sync for CBeacon {}

impl LifetimeBeacon for CBeacon {
    fn has_exited(&self) -> bool {
        // SAFETY: `token` came from the host's `beacon_new`.
        unsafe { (self.check)(self.token) != 0 }
    }
}

impl Drop for CBeacon {
    fn drop(&mut self) {
        if let Some(free) = self.free {
            // SAFETY: `token` came from the host's `beacon_new` and is
            // released once.
            unsafe { free(self.token) };
        }
    }
}

/// Core backend that forwards to a host vtable.
#[derive(Debug)]
pub struct CBackend {
    vtable: GtThreadBackendVTable,
}

impl CBackend {
    #[must_use]
    pub const fn new(vtable: GtThreadBackendVTable) -> Self {
        Self { vtable }
    }
}

impl ThreadBackend for CBackend {
    fn create(&self, request: SpawnRequest) -> Result<SystemThread, ThreadError> {
        let Some(create) = self.vtable.create else {
            missing("create")
        };
        let name = request.name.as_deref().map(c_name);
        let name_ptr = name.as_ref().map_or(ptr::null(), |n| n.as_ptr());
        let data = Box::into_raw(Box::new(request.entry)).cast::<c_void>();
        let mut out: *mut c_void = ptr::null_mut();
        // SAFETY: the host contract above; `name_ptr` outlives the call.
        let rc = unsafe { create(run_entry, data, name_ptr, request.stack_size, &mut out) };
        if rc != 0 {
            // SAFETY: the host did not start the thread, so `data` is still ours.
            drop(unsafe { Box::from_raw(data.cast::<ThreadEntry>()) });
            return Err(ThreadError::from_errno(rc));
        }
        Ok(Box::new(CHandle(out)))
    }

    fn detach(&self, thread: SystemThread) {
        let Some(detach) = self.vtable.detach else {
            missing("detach")
        };
        // SAFETY: the handle came from the host's `create`.
        unsafe { detach(handle(thread)) };
    }

    fn wait(&self, thread: SystemThread) {
        let Some(wait) = self.vtable.wait else {
            missing("wait")
        };
        // SAFETY: the handle came from the host's `create`.
        unsafe { wait(handle(thread)) };
    }

    fn exit_current(&self) -> ! {
        let Some(exit_current) = self.vtable.exit_current else {
            missing("exit_current")
        };
        // SAFETY: host contract.
        unsafe { exit_current() };
        tracing::error!("host exit_current returned; aborting");
        std::process::abort()
    }

    fn set_name(&self, name: &str) {
        if let Some(set_name) = self.vtable.set_name {
            let name = c_name(name);
            // SAFETY: `name` is NUL-terminated and outlives the call.
            unsafe { set_name(name.as_ptr()) };
        }
    }

    fn yield_now(&self) {
        match self.vtable.yield_now {
            // SAFETY: host contract.
            Some(yield_now) => unsafe { yield_now() },
            None => std::thread::yield_now(),
        }
    }

    fn beacon_new(&self) -> Box<dyn LifetimeBeacon> {
        let (Some(beacon_new), Some(check)) = (self.vtable.beacon_new, self.vtable.beacon_check) else {
            missing("beacon_new")
        };
        // SAFETY: host contract.
        let token = unsafe { beacon_new() };
        Box::new(CBeacon {
            token,
            check,
            free: self.vtable.beacon_free,
        })
    }
}

/// Install a host backend and initialize the layer with it.
///
/// Returns 0 on success, `EINVAL` for a null table, and `EBUSY` if the layer
/// was already initialized.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_thread_set_backend(vtable: *const GtThreadBackendVTable) -> c_int {
    // SAFETY: caller passes null or a readable table.
    let Some(vtable) = (unsafe { vtable.as_ref() }) else {
        return libc::EINVAL;
    };
    let backend = Arc::new(CBackend::new(*vtable)) as Arc<dyn ThreadBackend>;
    if gthread_core::init_with(Config::new().backend(backend)) {
        0
    } else {
        libc::EBUSY
    }
}
