//! Thread records and lifecycle.
//!
//! A thread record is allocated through the allocation vtable and reference
//! counted by hand. A spawned thread's record starts with two references: one
//! owned by the returned [`Thread`], one held in the running thread's locals
//! until its function returns or it calls [`exit`]. Releasing the last
//! reference detaches the OS thread if nobody joined it, then frees the
//! record.
//!
//! Threads this layer did not create get a non-joinable record on their
//! first call to [`Thread::current`], released when the thread's locals are
//! destroyed.

#![allow(unsafe_code)]

use std::cell::Cell;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::backend::{SchedulerSettings, SpawnRequest, SystemThread, ThreadBackend, ThreadExit};
use crate::context;
use crate::error::ThreadError;
use crate::mem;
use crate::metrics::{ThreadMetrics, global_metrics};
use crate::private;

type ThreadFn = Box<dyn FnOnce() -> usize + Send + 'static>;

pub(crate) struct ThreadRecord {
    ref_count: AtomicUsize,
    joinable: bool,
    /// Created by [`Builder::spawn`] rather than adopted.
    ours: bool,
    name: Option<String>,
    scheduler: Option<SchedulerSettings>,
    retval: AtomicUsize,
    func: Mutex<Option<ThreadFn>>,
    /// `None` once joined.
    system: Mutex<Option<SystemThread>>,
    backend: Arc<dyn ThreadBackend>,
}

/// # Safety
///
/// `record` must be live.
unsafe fn retain(record: NonNull<ThreadRecord>) {
    // SAFETY: caller guarantees liveness.
    unsafe { record.as_ref() }.ref_count.fetch_add(1, Ordering::Relaxed);
}

/// # Safety
///
/// `record` must be live and the caller must own one reference to it.
unsafe fn release(record: NonNull<ThreadRecord>) {
    // SAFETY: caller owns a reference.
    let rec = unsafe { record.as_ref() };
    if rec.ref_count.fetch_sub(1, Ordering::Release) != 1 {
        return;
    }
    atomic::fence(Ordering::Acquire);
    let unjoined = rec.system.lock().take();
    if let Some(system) = unjoined {
        rec.backend.detach(system);
    }
    // SAFETY: that was the last reference.
    unsafe { mem::free_value(record) };
}

// ---------------------------------------------------------------------------
// Current thread
// ---------------------------------------------------------------------------

/// The calling thread's own reference to its record.
struct CurrentThread(Cell<Option<NonNull<ThreadRecord>>>);

impl Drop for CurrentThread {
    fn drop(&mut self) {
        if let Some(record) = self.0.take() {
            // SAFETY: the slot owns one reference.
            unsafe { release(record) };
        }
    }
}

thread_local! {
    static CURRENT: CurrentThread = const { CurrentThread(Cell::new(None)) };
}

fn current_record() -> Option<NonNull<ThreadRecord>> {
    CURRENT.try_with(|current| current.0.get()).ok().flatten()
}

fn release_current() {
    if let Some(record) = CURRENT.try_with(|current| current.0.take()).ok().flatten() {
        // SAFETY: the slot owned one reference.
        unsafe { release(record) };
    }
}

/// Run the calling thread's private destructors and drop its own reference.
fn finish_current() {
    private::run_thread_cleanup();
    release_current();
}

#[derive(Clone, Copy)]
struct RecordPtr(NonNull<ThreadRecord>);

// SAFETY: `ThreadRecord` is `Send + Sync`; the pointer carries the new
// thread's reference across the spawn.
unsafe impl Send for RecordPtr {}

fn thread_proxy(record: RecordPtr) {
    let record = record.0;
    if CURRENT.try_with(|current| current.0.set(Some(record))).is_err() {
        // SAFETY: the proxy owns the thread's reference.
        unsafe { release(record) };
        return;
    }
    let func = {
        // SAFETY: the reference adopted above keeps the record alive.
        let rec = unsafe { record.as_ref() };
        if let Some(name) = rec.name.as_deref() {
            rec.backend.set_name(name);
        }
        if let Some(settings) = rec.scheduler.as_ref() {
            rec.backend.apply_scheduler_settings(settings);
        }
        rec.func.lock().take()
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(move || func.map_or(0, |f| f())));
    match outcome {
        Ok(retval) => {
            if let Some(current) = current_record() {
                // SAFETY: held by CURRENT.
                unsafe { current.as_ref() }
                    .retval
                    .store(retval, Ordering::Release);
            }
        }
        // `exit` already stored the value and finished the thread.
        Err(payload) if payload.is::<ThreadExit>() => {}
        Err(payload) => {
            finish_current();
            panic::resume_unwind(payload);
        }
    }
    finish_current();
}

// ---------------------------------------------------------------------------
// Thread handle
// ---------------------------------------------------------------------------

/// Counted reference to a thread record.
///
/// Cloning adds a reference and dropping releases one; dropping the handle
/// returned by spawn without joining detaches the thread.
pub struct Thread {
    record: NonNull<ThreadRecord>,
}

// SAFETY: `ThreadRecord` is `Send + Sync` and reference counted atomically.
unsafe impl Send for Thread {}
// SAFETY: as above.
unsafe impl Sync for Thread {}

impl Thread {
    fn record(&self) -> &ThreadRecord {
        // SAFETY: the handle owns a reference.
        unsafe { self.record.as_ref() }
    }

    /// The calling thread's record, adopting the thread if this layer did not
    /// create it.
    #[must_use]
    pub fn current() -> Self {
        if let Some(record) = current_record() {
            // SAFETY: held by CURRENT.
            unsafe { retain(record) };
            return Self { record };
        }
        let record = mem::alloc_value(ThreadRecord {
            ref_count: AtomicUsize::new(1),
            joinable: false,
            ours: false,
            name: None,
            scheduler: None,
            retval: AtomicUsize::new(0),
            func: Mutex::new(None),
            system: Mutex::new(None),
            backend: context::backend(),
        });
        if CURRENT.try_with(|current| current.0.set(Some(record))).is_ok() {
            // SAFETY: just allocated; CURRENT owns the first reference.
            unsafe { retain(record) };
        }
        Self { record }
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.record().name.as_deref()
    }

    #[must_use]
    pub fn is_joinable(&self) -> bool {
        self.record().joinable
    }

    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.record().ref_count.load(Ordering::Relaxed)
    }

    /// Wait for the thread to finish and return its function's result (or
    /// the value it passed to [`exit`]).
    ///
    /// Concurrent joins through other handles are serialized; only the first
    /// waits on the OS thread.
    ///
    /// # Panics
    ///
    /// Panics if the thread is not joinable, and re-raises a panic that
    /// escaped the thread's function.
    pub fn join(self) -> usize {
        let record = self.record();
        assert!(
            record.joinable,
            "Thread::join() called on a thread that is not joinable"
        );
        {
            let mut system = record.system.lock();
            if let Some(handle) = system.take() {
                record.backend.wait(handle);
                tracing::debug!(name = record.name.as_deref(), "thread joined");
            }
        }
        record.retval.load(Ordering::Acquire)
    }

    /// Release this handle without waiting. The thread keeps running and is
    /// detached once no references remain.
    pub fn detach(self) {
        drop(self);
    }

    /// Give up this handle, returning the record pointer for the C boundary.
    #[must_use]
    pub fn into_raw(self) -> *mut c_void {
        let ptr = self.record.as_ptr().cast();
        std::mem::forget(self);
        ptr
    }

    #[must_use]
    pub fn as_ptr(&self) -> *mut c_void {
        self.record.as_ptr().cast()
    }

    /// Reclaim a handle given up by [`Thread::into_raw`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `into_raw` and carry a reference not yet
    /// reclaimed.
    #[must_use]
    pub unsafe fn from_raw(ptr: *mut c_void) -> Self {
        Self {
            // SAFETY: caller guarantees `ptr` came from `into_raw`.
            record: unsafe { NonNull::new_unchecked(ptr.cast()) },
        }
    }

    /// Add a reference to the record behind `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live record.
    pub unsafe fn increment_ref_count(ptr: *mut c_void) {
        // SAFETY: caller guarantees liveness.
        unsafe { retain(NonNull::new_unchecked(ptr.cast())) };
    }
}

impl Clone for Thread {
    fn clone(&self) -> Self {
        // SAFETY: the handle owns a reference.
        unsafe { retain(self.record) };
        Self {
            record: self.record,
        }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        // SAFETY: the handle owns a reference.
        unsafe { release(self.record) };
    }
}

impl PartialEq for Thread {
    fn eq(&self, other: &Self) -> bool {
        self.record == other.record
    }
}

impl Eq for Thread {}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.name())
            .field("joinable", &self.is_joinable())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
enum Scheduling {
    #[default]
    SystemDefault,
    Inherit,
    Explicit(SchedulerSettings),
}

/// Thread spawn options.
#[derive(Debug, Default)]
pub struct Builder {
    name: Option<String>,
    stack_size: usize,
    scheduling: Scheduling,
}

impl Builder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stack size in bytes; 0 keeps the system default.
    #[must_use]
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Start the thread with the spawning thread's scheduler settings.
    #[must_use]
    pub fn inherit_priority(mut self, inherit: bool) -> Self {
        self.scheduling = if inherit {
            Scheduling::Inherit
        } else {
            Scheduling::SystemDefault
        };
        self
    }

    #[must_use]
    pub fn scheduler_settings(mut self, settings: SchedulerSettings) -> Self {
        self.scheduling = Scheduling::Explicit(settings);
        self
    }

    pub fn spawn<F>(self, f: F) -> Result<Thread, ThreadError>
    where
        F: FnOnce() -> usize + Send + 'static,
    {
        let backend = context::backend();
        let scheduler = match self.scheduling {
            Scheduling::SystemDefault => None,
            Scheduling::Inherit => backend.scheduler_settings(),
            Scheduling::Explicit(settings) => Some(settings),
        };
        let record = mem::alloc_value(ThreadRecord {
            ref_count: AtomicUsize::new(2),
            joinable: true,
            ours: true,
            name: self.name.clone(),
            scheduler,
            retval: AtomicUsize::new(0),
            func: Mutex::new(Some(Box::new(f))),
            system: Mutex::new(None),
            backend: Arc::clone(&backend),
        });
        let thread = Thread { record };
        let carried = RecordPtr(record);
        let request = SpawnRequest {
            name: self.name,
            stack_size: self.stack_size,
            entry: Box::new(move || thread_proxy(carried)),
        };

        match backend.create(request) {
            Ok(system) => {
                *thread.record().system.lock() = Some(system);
                ThreadMetrics::inc(&global_metrics().threads_spawned);
                tracing::debug!(name = thread.name(), "thread spawned");
                Ok(thread)
            }
            Err(err) => {
                ThreadMetrics::inc(&global_metrics().spawn_failures);
                tracing::debug!(error = %err, retryable = err.is_again(), "thread creation failed");
                // The thread never ran, so its reference is still ours.
                // SAFETY: `thread` keeps the record alive across this call.
                unsafe { release(record) };
                Err(err)
            }
        }
    }
}

/// Spawn a thread with default options.
pub fn spawn<F>(f: F) -> Result<Thread, ThreadError>
where
    F: FnOnce() -> usize + Send + 'static,
{
    Builder::new().spawn(f)
}

/// Terminate the calling thread with `retval` as its join result, after
/// running its pending private destructors.
///
/// # Panics
///
/// Panics when called from a thread this layer did not spawn.
pub fn exit(retval: usize) -> ! {
    let Some(record) = current_record().filter(|r| {
        // SAFETY: held by CURRENT.
        unsafe { r.as_ref() }.ours
    }) else {
        panic!("thread::exit() called from a thread that was not spawned by this layer");
    };
    // SAFETY: held by CURRENT until `finish_current` below.
    let rec = unsafe { record.as_ref() };
    rec.retval.store(retval, Ordering::Release);
    let backend = Arc::clone(&rec.backend);
    finish_current();
    backend.exit_current()
}

/// Hint the scheduler to run another thread.
pub fn yield_now() {
    context::backend().yield_now();
}

/// Name the calling thread at the OS level.
pub fn set_name(name: &str) {
    context::backend().set_name(name);
}
