//! Condition variable.
//!
//! Natively the condition is a futex sequence counter: waiters sleep on the
//! value they read while holding the mutex, and every notification bumps it.
//!
//! The emulation keeps a FIFO queue of waiter nodes in a lazily allocated
//! [`CondQueue`]. A waiter appends its node, releases the mutex, and sleeps on
//! its node's event. `signal` pops the head and `broadcast` empties the
//! queue; both set events while holding the queue lock, so once a timed-out
//! waiter finds its node already gone it knows the event is set.

#![allow(unsafe_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex as QueueLock;

use super::mutex::Mutex;
use super::waiter::{self, WaiterRef};
use crate::context::{self, ThreadContext};
use crate::futex::{self, EVENT_WAIT_INFINITE};
use crate::lazy::{Backing, BackingPtr, LazyBox, Registry};
use crate::metrics::{ThreadMetrics, global_metrics};

/// Longest single event wait; a finite deadline is never turned into an
/// infinite wait.
const MAX_FINITE_WAIT_MS: u32 = EVENT_WAIT_INFINITE - 1;

pub(crate) struct CondQueue {
    waiters: QueueLock<VecDeque<WaiterRef>>,
}

impl Backing for CondQueue {
    fn create() -> Self {
        Self {
            waiters: QueueLock::new(VecDeque::new()),
        }
    }

    fn registry(ctx: &ThreadContext) -> &Registry<BackingPtr<Self>> {
        &ctx.conds
    }
}

impl CondQueue {
    fn enqueue(&self, waiter: WaiterRef) {
        self.waiters.lock().push_back(waiter);
    }

    /// Unlink `waiter`. Returns `false` if a notification already took it.
    fn remove(&self, waiter: WaiterRef) -> bool {
        let mut waiters = self.waiters.lock();
        match waiters.iter().position(|w| *w == waiter) {
            Some(idx) => {
                waiters.remove(idx);
                true
            }
            None => false,
        }
    }

    fn signal(&self) {
        let mut waiters = self.waiters.lock();
        if let Some(waiter) = waiters.pop_front() {
            waiter.event().set();
        }
    }

    fn broadcast(&self) {
        let mut waiters = self.waiters.lock();
        for waiter in waiters.drain(..) {
            waiter.event().set();
        }
    }

    fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    fn wait(&self, mutex: &Mutex, deadline: Option<Instant>) -> bool {
        let waiter = waiter::current();
        self.enqueue(waiter);
        mutex.unlock();

        let mut signalled = loop {
            let timeout_ms = match deadline {
                None => EVENT_WAIT_INFINITE,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break false;
                    }
                    span_to_ms(deadline - now)
                }
            };
            if waiter.event().wait(timeout_ms) {
                break true;
            }
        };

        if !signalled && !self.remove(waiter) {
            // A notification dequeued us between the timeout and the unlink.
            waiter.event().reset();
            signalled = true;
        }

        mutex.lock();
        if !signalled {
            ThreadMetrics::inc(&global_metrics().cond_timeouts);
        }
        signalled
    }
}

/// Whole milliseconds covering `span`, rounded up and clamped below infinite.
fn span_to_ms(span: Duration) -> u32 {
    let ms = span.as_micros().div_ceil(1000);
    u32::try_from(ms).map_or(MAX_FINITE_WAIT_MS, |ms| ms.min(MAX_FINITE_WAIT_MS))
}

/// Condition variable paired with a caller-held [`Mutex`].
///
/// Wakeups only say a notification happened; callers re-check their
/// predicate in a loop. The all-zero value is a valid condition.
#[repr(C)]
pub struct Cond {
    seq: AtomicU32,
    emulated: LazyBox<CondQueue>,
}

impl Cond {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
            emulated: LazyBox::new(),
        }
    }

    fn emulation(&self) -> Option<&CondQueue> {
        context::uses_emulation().then(|| self.emulated.get_or_init())
    }

    /// Release `mutex`, wait for a notification, and re-acquire `mutex`.
    pub fn wait(&self, mutex: &Mutex) {
        let _ = self.wait_deadline(mutex, None);
    }

    /// Like [`Cond::wait`], giving up at `deadline`. Returns `false` if the
    /// deadline passed first. `mutex` is held again in either case.
    #[must_use]
    pub fn wait_until(&self, mutex: &Mutex, deadline: Instant) -> bool {
        self.wait_deadline(mutex, Some(deadline))
    }

    #[must_use]
    pub fn wait_timeout(&self, mutex: &Mutex, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        self.wait_deadline(mutex, deadline)
    }

    fn wait_deadline(&self, mutex: &Mutex, deadline: Option<Instant>) -> bool {
        match self.emulation() {
            Some(queue) => queue.wait(mutex, deadline),
            None => self.wait_native(mutex, deadline),
        }
    }

    fn wait_native(&self, mutex: &Mutex, deadline: Option<Instant>) -> bool {
        let seq = self.seq.load(Ordering::Relaxed);
        mutex.unlock();
        let signalled = loop {
            let timeout = match deadline {
                None => None,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break false;
                    }
                    Some(deadline - now)
                }
            };
            futex::wait(&self.seq, seq, timeout);
            if self.seq.load(Ordering::Acquire) != seq {
                break true;
            }
        };
        mutex.lock();
        signalled
    }

    /// Wake one waiter, if any.
    pub fn signal(&self) {
        match self.emulation() {
            Some(queue) => queue.signal(),
            None => {
                self.seq.fetch_add(1, Ordering::Release);
                futex::wake_one(&self.seq);
            }
        }
    }

    /// Wake every current waiter.
    pub fn broadcast(&self) {
        match self.emulation() {
            Some(queue) => queue.broadcast(),
            None => {
                self.seq.fetch_add(1, Ordering::Release);
                futex::wake_all(&self.seq);
            }
        }
    }

    /// Free the emulation backing object, if any.
    pub fn clear(&mut self) {
        self.emulated.take_and_free();
    }

    /// Test hook: number of threads queued under emulation.
    #[doc(hidden)]
    #[must_use]
    pub fn queued_waiters_for_tests(&self) -> usize {
        self.emulated.get().map_or(0, CondQueue::len)
    }
}

impl Default for Cond {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Cond {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for Cond {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cond")
            .field("queued_waiters", &self.queued_waiters_for_tests())
            .finish_non_exhaustive()
    }
}
