//! Futex-backed non-recursive mutex.
//!
//! The lock word has three states: 0 unlocked, 1 locked, 2 locked with
//! possible waiters. An all-zero `Mutex` is a valid unlocked mutex.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::futex;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

static MUTEX_SPIN_BRANCHES: AtomicU64 = AtomicU64::new(0);
static MUTEX_WAIT_BRANCHES: AtomicU64 = AtomicU64::new(0);
static MUTEX_WAKE_BRANCHES: AtomicU64 = AtomicU64::new(0);

#[repr(C)]
#[derive(Debug, Default)]
pub struct Mutex {
    word: AtomicU32,
}

impl Mutex {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(UNLOCKED),
        }
    }

    pub fn lock(&self) {
        if self
            .word
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
        self.lock_contended();
    }

    #[cold]
    fn lock_contended(&self) {
        MUTEX_SPIN_BRANCHES.fetch_add(1, Ordering::Relaxed);
        loop {
            let observed = self.word.load(Ordering::Relaxed);
            if observed == UNLOCKED {
                if self
                    .word
                    .compare_exchange(UNLOCKED, CONTENDED, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            if observed == LOCKED {
                let _ = self.word.compare_exchange(
                    LOCKED,
                    CONTENDED,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                );
            }

            MUTEX_WAIT_BRANCHES.fetch_add(1, Ordering::Relaxed);
            futex::wait(&self.word, CONTENDED, None);
        }
    }

    /// Acquire without blocking. Returns whether the lock was taken.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        self.word
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release the lock.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is not locked.
    pub fn unlock(&self) {
        match self.word.swap(UNLOCKED, Ordering::Release) {
            UNLOCKED => panic!("Mutex::unlock() called on an unlocked mutex"),
            LOCKED => {}
            _ => {
                MUTEX_WAKE_BRANCHES.fetch_add(1, Ordering::Relaxed);
                futex::wake_one(&self.word);
            }
        }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.word.load(Ordering::Relaxed) != UNLOCKED
    }
}

/// Test hook: snapshot spin/wait/wake branch counters.
#[doc(hidden)]
#[must_use]
pub fn mutex_branch_counters_for_tests() -> (u64, u64, u64) {
    (
        MUTEX_SPIN_BRANCHES.load(Ordering::Relaxed),
        MUTEX_WAIT_BRANCHES.load(Ordering::Relaxed),
        MUTEX_WAKE_BRANCHES.load(Ordering::Relaxed),
    )
}
