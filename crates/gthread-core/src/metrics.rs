//! Atomic counters for threading-layer observability.
//!
//! All counters use relaxed ordering. They are diagnostic only and never
//! order memory for the primitives they count.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Global threading-layer counters.
pub struct ThreadMetrics {
    /// Lazily allocated backing objects that won the publish race.
    pub lazy_allocations: AtomicU64,
    /// Backing objects freed after losing the publish race.
    pub lazy_discards: AtomicU64,
    /// Per-thread waiter nodes allocated.
    pub waiter_allocations: AtomicU64,
    /// Threads started successfully.
    pub threads_spawned: AtomicU64,
    /// Thread creation attempts refused by the backend.
    pub spawn_failures: AtomicU64,
    /// Emulated condition waits that ended on their deadline.
    pub cond_timeouts: AtomicU64,
    /// Registry entries released by deinit.
    pub registry_drained: AtomicU64,
}

impl ThreadMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lazy_allocations: AtomicU64::new(0),
            lazy_discards: AtomicU64::new(0),
            waiter_allocations: AtomicU64::new(0),
            threads_spawned: AtomicU64::new(0),
            spawn_failures: AtomicU64::new(0),
            cond_timeouts: AtomicU64::new(0),
            registry_drained: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            lazy_allocations: Self::get(&self.lazy_allocations),
            lazy_discards: Self::get(&self.lazy_discards),
            waiter_allocations: Self::get(&self.waiter_allocations),
            threads_spawned: Self::get(&self.threads_spawned),
            spawn_failures: Self::get(&self.spawn_failures),
            cond_timeouts: Self::get(&self.cond_timeouts),
            registry_drained: Self::get(&self.registry_drained),
        }
    }
}

impl Default for ThreadMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub lazy_allocations: u64,
    pub lazy_discards: u64,
    pub waiter_allocations: u64,
    pub threads_spawned: u64,
    pub spawn_failures: u64,
    pub cond_timeouts: u64,
    pub registry_drained: u64,
}

static GLOBAL_METRICS: ThreadMetrics = ThreadMetrics::new();

/// Access the global metrics singleton.
#[must_use]
pub fn global_metrics() -> &'static ThreadMetrics {
    &GLOBAL_METRICS
}
