//! OS thread backend.
//!
//! Thread creation, joining, detaching, exiting, naming, and lifetime
//! beacons go through a [`ThreadBackend`] fixed at init. The built-in
//! [`native::NativeBackend`] runs on `std::thread`; a host may supply its
//! own through [`crate::Config::backend`].
//!
//! `create`, `detach`, `wait`, `exit_current` and `beacon_new` are required.
//! Their default bodies report a broken port by panicking. The remaining
//! methods default to doing nothing.

use std::any::Any;

use crate::beacon::LifetimeBeacon;
use crate::error::ThreadError;

pub mod native;

/// Backend-owned handle to a running OS thread.
pub type SystemThread = Box<dyn Any + Send>;

/// Entry point the backend must run on the new thread.
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

/// Unwind payload used to terminate a thread from inside its function.
///
/// A backend may implement [`ThreadBackend::exit_current`] by resuming an
/// unwind with this payload; the thread proxy catches it and finishes the
/// thread normally.
#[derive(Debug, Clone, Copy)]
pub struct ThreadExit;

/// Scheduling class and priority of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulerSettings {
    pub policy: i32,
    pub priority: i32,
}

/// What the backend needs to start a thread.
pub struct SpawnRequest {
    pub name: Option<String>,
    /// Requested stack size in bytes; 0 selects the system default.
    pub stack_size: usize,
    pub entry: ThreadEntry,
}

#[cold]
fn missing(operation: &str) -> ! {
    tracing::error!(operation, "thread backend is missing a required operation");
    panic!("thread backend does not implement `{operation}`");
}

pub trait ThreadBackend: Send + Sync + 'static {
    /// Start an OS thread running `request.entry`.
    fn create(&self, request: SpawnRequest) -> Result<SystemThread, ThreadError> {
        let _ = request;
        missing("create")
    }

    /// Let `thread` run to completion without ever being waited for.
    fn detach(&self, thread: SystemThread) {
        let _ = thread;
        missing("detach")
    }

    /// Block until `thread` has terminated.
    fn wait(&self, thread: SystemThread) {
        let _ = thread;
        missing("wait")
    }

    /// Terminate the calling thread. Pending private destructors have already
    /// run.
    fn exit_current(&self) -> ! {
        missing("exit_current")
    }

    /// Name the calling thread.
    fn set_name(&self, name: &str) {
        let _ = name;
    }

    fn yield_now(&self) {}

    /// Scheduler settings of the calling thread, if they can be read.
    fn scheduler_settings(&self) -> Option<SchedulerSettings> {
        None
    }

    /// Apply `settings` to the calling thread.
    fn apply_scheduler_settings(&self, settings: &SchedulerSettings) {
        let _ = settings;
    }

    /// Beacon that reports when the calling OS thread has terminated.
    fn beacon_new(&self) -> Box<dyn LifetimeBeacon> {
        missing("beacon_new")
    }
}
