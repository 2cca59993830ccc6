//! Word-sized wait/wake and the auto-reset event built on it.
//!
//! Linux uses the private futex syscall directly. Other targets park on the
//! word's address through `parking_lot_core`.

#![allow(unsafe_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Event wait that never times out.
pub(crate) const EVENT_WAIT_INFINITE: u32 = u32::MAX;

/// Block while `*word == expected`, for at most `timeout`.
///
/// Returns `false` only if the timeout elapsed. Spurious returns are
/// possible; callers re-check their condition.
#[cfg(target_os = "linux")]
pub(crate) fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> bool {
    let ts = timeout.map(|t| libc::timespec {
        tv_sec: t.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: t.subsec_nanos() as libc::c_long,
    });
    let ts_ptr = ts
        .as_ref()
        .map_or(std::ptr::null(), |ts| ts as *const libc::timespec);
    // SAFETY: Linux futex syscall with a valid userspace address and either a
    // null or a live relative timeout.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32 as *const u32,
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            ts_ptr,
        )
    };
    if rc == 0 {
        return true;
    }
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    match errno {
        libc::ETIMEDOUT => false,
        libc::EAGAIN | libc::EINTR => true,
        _ => crate::error::thread_abort(errno, "futex(FUTEX_WAIT)"),
    }
}

#[cfg(target_os = "linux")]
fn wake(word: &AtomicU32, count: i32) {
    // SAFETY: Linux futex syscall with a valid userspace address.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32 as *const u32,
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            count,
        )
    };
    if rc < 0 {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        crate::error::thread_abort(errno, "futex(FUTEX_WAKE)");
    }
}

#[cfg(target_os = "linux")]
pub(crate) fn wake_one(word: &AtomicU32) {
    wake(word, 1);
}

#[cfg(target_os = "linux")]
pub(crate) fn wake_all(word: &AtomicU32) {
    wake(word, i32::MAX);
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> bool {
    use parking_lot_core::{DEFAULT_PARK_TOKEN, ParkResult};
    let key = word as *const AtomicU32 as usize;
    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
    // SAFETY: the validate closure only reads the word; none of the
    // callbacks panic or re-enter the parking lot.
    let result = unsafe {
        parking_lot_core::park(
            key,
            || word.load(Ordering::SeqCst) == expected,
            || {},
            |_, _| {},
            DEFAULT_PARK_TOKEN,
            deadline,
        )
    };
    !matches!(result, ParkResult::TimedOut)
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn wake_one(word: &AtomicU32) {
    let key = word as *const AtomicU32 as usize;
    // SAFETY: the callback does not panic or re-enter the parking lot.
    unsafe {
        parking_lot_core::unpark_one(key, |_| parking_lot_core::DEFAULT_UNPARK_TOKEN);
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn wake_all(word: &AtomicU32) {
    let key = word as *const AtomicU32 as usize;
    // SAFETY: keys are addresses of live words.
    unsafe {
        parking_lot_core::unpark_all(key, parking_lot_core::DEFAULT_UNPARK_TOKEN);
    }
}

// ---------------------------------------------------------------------------
// Auto-reset event
// ---------------------------------------------------------------------------

/// Binary event that resets itself when a wait consumes it.
#[repr(C)]
pub(crate) struct Event {
    state: AtomicU32,
}

impl Event {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
        }
    }

    pub(crate) fn set(&self) {
        if self.state.swap(1, Ordering::Release) == 0 {
            wake_one(&self.state);
        }
    }

    pub(crate) fn reset(&self) {
        self.state.store(0, Ordering::Relaxed);
    }

    /// Wait up to `timeout_ms` ([`EVENT_WAIT_INFINITE`] for no limit).
    /// Returns `true` if the event was consumed.
    pub(crate) fn wait(&self, timeout_ms: u32) -> bool {
        let deadline = (timeout_ms != EVENT_WAIT_INFINITE)
            .then(|| Instant::now() + Duration::from_millis(u64::from(timeout_ms)));
        loop {
            if self
                .state
                .compare_exchange(1, 0, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
            let remaining = match deadline {
                None => None,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    Some(deadline - now)
                }
            };
            wait(&self.state, 0, remaining);
        }
    }
}
