//! # gthread-core
//!
//! Thread lifecycle and synchronization primitives: mutexes, recursive
//! mutexes, reader-writer locks, condition variables, thread-local private
//! values, thread spawn/join/exit, and lifetime beacons.
//!
//! OS thread operations go through a pluggable [`ThreadBackend`]. The
//! reader-writer lock and condition variable have a native implementation
//! and a software emulation, chosen once at [`init`]. All heap state the
//! layer owns is allocated through a replaceable [`MemVTable`].
//!
//! Modules that need `unsafe` opt in individually.

#![deny(unsafe_code)]

pub mod backend;
pub mod beacon;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
mod futex;
mod lazy;
pub mod mem;
pub mod metrics;
pub mod private;
pub mod sync;
pub mod thread;

pub use backend::{SchedulerSettings, SpawnRequest, SystemThread, ThreadBackend, ThreadExit};
pub use beacon::{Beacon, LifetimeBeacon};
pub use config::{Config, Implementation};
pub use context::{deinit, implementation, init, init_with, is_initialized};
pub use error::{MemVTableError, ThreadError};
pub use mem::{MemVTable, set_mem_vtable};
pub use metrics::{MetricsSnapshot, ThreadMetrics, global_metrics};
pub use private::{DestroyNotify, PRIVATE_DESTROY_LAST, PRIVATE_DESTRUCTOR_ITERATIONS, Private};
pub use sync::{Cond, Mutex, RecMutex, RwLock};
pub use thread::{Builder, Thread};
