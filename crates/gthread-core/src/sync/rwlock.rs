//! Reader-writer lock.
//!
//! The native implementation is `parking_lot`'s raw rwlock embedded in the
//! object. The emulated implementation lazily allocates an [`SrwLock`]:
//!
//! - `writer_lock` is a reentrant critical section every acquisition passes
//!   through, which serializes writers and makes a reader wait out a writer.
//! - `writer_locked` detects a second exclusive acquisition by the holder,
//!   which the reentrant section would otherwise allow.
//! - Once the lock has ever been shared, `state` counts readers and holds the
//!   single queued writer. A writer that finds readers inside parks on its
//!   waiter event until the last reader leaves. Writers are serialized by
//!   `writer_lock`, so the slot never needs to hold more than one.

#![allow(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::lock_api::{RawReentrantMutex, RawRwLock as _};
use parking_lot::{Mutex, RawMutex, RawRwLock, RawThreadId};

use super::waiter::{self, WaiterRef};
use crate::context::{self, ThreadContext};
use crate::futex::EVENT_WAIT_INFINITE;
use crate::lazy::{Backing, BackingPtr, LazyBox, Registry};

// ---------------------------------------------------------------------------
// Emulation
// ---------------------------------------------------------------------------

type WriterSection = RawReentrantMutex<RawMutex, RawThreadId>;

struct SharedState {
    num_readers: usize,
    queued_writer: Option<WaiterRef>,
}

pub(crate) struct SrwLock {
    writer_lock: WriterSection,
    /// Guarded by `writer_lock`.
    writer_locked: AtomicBool,
    /// Set under `writer_lock` by the first reader.
    ever_shared: AtomicBool,
    state: Mutex<SharedState>,
}

impl Backing for SrwLock {
    fn create() -> Self {
        Self {
            writer_lock: WriterSection::INIT,
            writer_locked: AtomicBool::new(false),
            ever_shared: AtomicBool::new(false),
            state: Mutex::new(SharedState {
                num_readers: 0,
                queued_writer: None,
            }),
        }
    }

    fn registry(ctx: &ThreadContext) -> &Registry<BackingPtr<Self>> {
        &ctx.rw_locks
    }
}

impl SrwLock {
    fn writer_lock(&self) {
        self.writer_lock.lock();
        assert!(
            !self.writer_locked.load(Ordering::Relaxed),
            "RwLock::writer_lock() called by the thread that already holds it"
        );
        self.writer_locked.store(true, Ordering::Relaxed);

        if self.ever_shared.load(Ordering::Acquire) {
            let queued = {
                let mut state = self.state.lock();
                (state.num_readers > 0).then(|| {
                    debug_assert!(state.queued_writer.is_none());
                    let waiter = waiter::current();
                    state.queued_writer = Some(waiter);
                    waiter
                })
            };
            if let Some(waiter) = queued {
                waiter.event().wait(EVENT_WAIT_INFINITE);
                self.state.lock().queued_writer = None;
            }
        }
    }

    fn writer_trylock(&self) -> bool {
        if !self.writer_lock.try_lock() {
            return false;
        }
        if self.writer_locked.load(Ordering::Relaxed) {
            // SAFETY: taken just above.
            unsafe { self.writer_lock.unlock() };
            return false;
        }
        if self.ever_shared.load(Ordering::Acquire) && self.state.lock().num_readers > 0 {
            // SAFETY: taken just above.
            unsafe { self.writer_lock.unlock() };
            return false;
        }
        self.writer_locked.store(true, Ordering::Relaxed);
        true
    }

    fn writer_unlock(&self) {
        assert!(
            self.writer_lock.is_owned_by_current_thread() && self.writer_locked.load(Ordering::Relaxed),
            "RwLock::writer_unlock() called by a thread that does not hold the writer lock"
        );
        self.writer_locked.store(false, Ordering::Relaxed);
        // SAFETY: ownership checked above.
        unsafe { self.writer_lock.unlock() };
    }

    fn become_reader(&self) {
        self.ever_shared.store(true, Ordering::Release);
        self.state.lock().num_readers += 1;
    }

    fn reader_lock(&self) {
        self.writer_lock.lock();
        if self.writer_locked.load(Ordering::Relaxed) {
            // SAFETY: taken just above.
            unsafe { self.writer_lock.unlock() };
            panic!("RwLock::reader_lock() called by the thread that holds the writer lock");
        }
        self.become_reader();
        // SAFETY: taken above.
        unsafe { self.writer_lock.unlock() };
    }

    fn reader_trylock(&self) -> bool {
        if !self.writer_lock.try_lock() {
            return false;
        }
        let available = !self.writer_locked.load(Ordering::Relaxed);
        if available {
            self.become_reader();
        }
        // SAFETY: taken just above.
        unsafe { self.writer_lock.unlock() };
        available
    }

    fn reader_unlock(&self) {
        let mut state = self.state.lock();
        assert!(
            state.num_readers > 0,
            "RwLock::reader_unlock() called without a matching reader_lock()"
        );
        state.num_readers -= 1;
        if state.num_readers == 0 {
            if let Some(writer) = state.queued_writer {
                writer.event().set();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Public lock
// ---------------------------------------------------------------------------

/// Lock with shared (reader) and exclusive (writer) modes.
///
/// The all-zero value is a valid unlocked lock. Neither mode is reentrant:
/// a second writer acquisition, or a reader acquisition while holding the
/// writer lock, by the same thread panics under emulation and deadlocks
/// natively.
#[repr(C)]
pub struct RwLock {
    native: RawRwLock,
    emulated: LazyBox<SrwLock>,
}

impl RwLock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            native: <RawRwLock as parking_lot::lock_api::RawRwLock>::INIT,
            emulated: LazyBox::new(),
        }
    }

    fn emulation(&self) -> Option<&SrwLock> {
        context::uses_emulation().then(|| self.emulated.get_or_init())
    }

    pub fn writer_lock(&self) {
        match self.emulation() {
            Some(srw) => srw.writer_lock(),
            None => self.native.lock_exclusive(),
        }
    }

    #[must_use]
    pub fn writer_trylock(&self) -> bool {
        match self.emulation() {
            Some(srw) => srw.writer_trylock(),
            None => self.native.try_lock_exclusive(),
        }
    }

    /// # Panics
    ///
    /// Panics if the lock is not write-locked (under emulation: not by the
    /// calling thread).
    pub fn writer_unlock(&self) {
        match self.emulation() {
            Some(srw) => srw.writer_unlock(),
            None => {
                assert!(
                    self.native.is_locked_exclusive(),
                    "RwLock::writer_unlock() called on a lock that is not write-locked"
                );
                // SAFETY: the lock is held exclusively; callers pair unlock
                // with their own lock.
                unsafe { self.native.unlock_exclusive() };
            }
        }
    }

    pub fn reader_lock(&self) {
        match self.emulation() {
            Some(srw) => srw.reader_lock(),
            None => self.native.lock_shared(),
        }
    }

    #[must_use]
    pub fn reader_trylock(&self) -> bool {
        match self.emulation() {
            Some(srw) => srw.reader_trylock(),
            None => self.native.try_lock_shared(),
        }
    }

    /// # Panics
    ///
    /// Panics if the lock has no readers, including when it is held by a
    /// writer.
    pub fn reader_unlock(&self) {
        match self.emulation() {
            Some(srw) => srw.reader_unlock(),
            None => {
                assert!(
                    self.native.is_locked() && !self.native.is_locked_exclusive(),
                    "RwLock::reader_unlock() called without a matching reader_lock()"
                );
                // SAFETY: the lock is held shared; callers pair unlock with
                // their own lock.
                unsafe { self.native.unlock_shared() };
            }
        }
    }

    /// Free the emulation backing object, if any.
    pub fn clear(&mut self) {
        self.emulated.take_and_free();
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RwLock {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for RwLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RwLock")
            .field("emulation_allocated", &self.emulated.get().is_some())
            .finish_non_exhaustive()
    }
}
