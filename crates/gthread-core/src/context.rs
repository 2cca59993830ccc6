//! Process-lifetime threading context.
//!
//! The context owns the selected backend, the primitive implementation, and
//! every registry used for lazy-allocation bookkeeping. It is created by the
//! first [`init`] (explicit or implicit) and torn down by [`deinit`].

#![allow(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::backend::ThreadBackend;
use crate::backend::native::NativeBackend;
use crate::config::{Config, Implementation};
use crate::lazy::{BackingPtr, Registry};
use crate::mem;
use crate::metrics::{ThreadMetrics, global_metrics};
use crate::private;
use crate::sync::cond::CondQueue;
use crate::sync::rec_mutex::RecMutexImpl;
use crate::sync::rwlock::SrwLock;

pub(crate) struct ThreadContext {
    pub(crate) backend: Arc<dyn ThreadBackend>,
    pub(crate) implementation: Implementation,
    pub(crate) rec_mutexes: Registry<BackingPtr<RecMutexImpl>>,
    /// Allocated private slot numbers.
    pub(crate) privates: Registry<usize>,
    pub(crate) rw_locks: Registry<BackingPtr<SrwLock>>,
    pub(crate) conds: Registry<BackingPtr<CondQueue>>,
}

static CONTEXT: RwLock<Option<ThreadContext>> = RwLock::new(None);

/// Resolved implementation, cached for lock-free reads. `Auto` (0) means the
/// context does not exist.
static ACTIVE_IMPLEMENTATION: AtomicU8 = AtomicU8::new(0);

/// Initialize with defaults. Idempotent.
pub fn init() -> bool {
    init_with(Config::default())
}

/// Initialize with `config`. Only the first call (or the first after
/// [`deinit`]) has any effect; returns whether this call initialized.
pub fn init_with(config: Config) -> bool {
    let mut guard = CONTEXT.write();
    if guard.is_some() {
        if config.backend.is_some() {
            tracing::warn!("thread backend offered after initialization; ignored");
        }
        return false;
    }
    let implementation = config.resolved_implementation();
    let custom_backend = config.backend.is_some();
    let backend = config
        .backend
        .unwrap_or_else(|| Arc::new(NativeBackend) as Arc<dyn ThreadBackend>);
    *guard = Some(ThreadContext {
        backend,
        implementation,
        rec_mutexes: Registry::new(),
        privates: Registry::new(),
        rw_locks: Registry::new(),
        conds: Registry::new(),
    });
    ACTIVE_IMPLEMENTATION.store(implementation.as_u8(), Ordering::Release);
    tracing::debug!(?implementation, custom_backend, "threading layer initialized");
    true
}

/// Tear the layer down.
///
/// Runs the calling thread's pending private destructors, then drains every
/// registry, frees each lazily allocated backing object, and releases every
/// private slot. The next use of the layer initializes it again.
///
/// # Safety
///
/// No other thread may be using any primitive of this layer. Primitives whose
/// backing object was freed here must not be used afterwards except to be
/// cleared or dropped.
pub unsafe fn deinit() {
    if !is_initialized() {
        return;
    }
    private::run_thread_cleanup();

    let Some(ctx) = CONTEXT.write().take() else {
        return;
    };
    ACTIVE_IMPLEMENTATION.store(Implementation::Auto.as_u8(), Ordering::Release);

    let rec_mutexes = free_all(&ctx.rec_mutexes);
    let rw_locks = free_all(&ctx.rw_locks);
    let conds = free_all(&ctx.conds);
    let privates = ctx.privates.drain().len();
    private::release_all_slots();

    let drained = rec_mutexes + rw_locks + conds + privates;
    ThreadMetrics::add(&global_metrics().registry_drained, drained as u64);
    tracing::debug!(
        rec_mutexes,
        rw_locks,
        conds,
        privates,
        "threading layer deinitialized"
    );
}

fn free_all<T>(registry: &Registry<BackingPtr<T>>) -> usize {
    let entries = registry.drain();
    for entry in &entries {
        // SAFETY: registered pointers are live vtable allocations owned by
        // the registry once drained.
        unsafe { mem::free_value(entry.0) };
    }
    entries.len()
}

#[must_use]
pub fn is_initialized() -> bool {
    ACTIVE_IMPLEMENTATION.load(Ordering::Acquire) != Implementation::Auto.as_u8()
}

/// The resolved primitive implementation, initializing if needed.
#[must_use]
pub fn implementation() -> Implementation {
    let raw = ACTIVE_IMPLEMENTATION.load(Ordering::Acquire);
    if raw != Implementation::Auto.as_u8() {
        return Implementation::from_u8(raw);
    }
    with(|ctx| ctx.implementation)
}

#[inline]
pub(crate) fn uses_emulation() -> bool {
    implementation().is_emulated()
}

/// Run `f` against the context, initializing with defaults first if needed.
pub(crate) fn with<R>(f: impl FnOnce(&ThreadContext) -> R) -> R {
    let ctx = loop {
        if let Ok(ctx) = RwLockReadGuard::try_map(CONTEXT.read(), Option::as_ref) {
            break ctx;
        }
        init();
    };
    f(&ctx)
}

/// Run `f` against the context only if it exists.
pub(crate) fn with_existing<R>(f: impl FnOnce(&ThreadContext) -> R) -> Option<R> {
    CONTEXT.read().as_ref().map(f)
}

pub(crate) fn backend() -> Arc<dyn ThreadBackend> {
    with(|ctx| Arc::clone(&ctx.backend))
}
