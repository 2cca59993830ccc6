//! Monotonic clock in microseconds, used for absolute condition deadlines.

#![allow(unsafe_code)]

use std::time::{Duration, Instant};

/// Microseconds on the system monotonic clock.
#[cfg(unix)]
#[must_use]
pub fn monotonic_time() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out-parameter for clock_gettime.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        crate::error::thread_abort(errno, "clock_gettime");
    }
    (ts.tv_sec as i64) * 1_000_000 + (ts.tv_nsec as i64) / 1_000
}

/// Microseconds since the first call in this process.
#[cfg(not(unix))]
#[must_use]
pub fn monotonic_time() -> i64 {
    use std::sync::OnceLock;
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    let elapsed = ORIGIN.get_or_init(Instant::now).elapsed();
    i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX)
}

/// Convert an absolute [`monotonic_time`] deadline into an [`Instant`].
#[must_use]
pub fn deadline_from_monotonic(end_time: i64) -> Instant {
    let now = Instant::now();
    let remaining = end_time.saturating_sub(monotonic_time());
    if remaining <= 0 {
        return now;
    }
    let span = Duration::from_micros(remaining as u64);
    now.checked_add(span)
        .unwrap_or_else(|| now + Duration::from_secs(u32::MAX as u64))
}
