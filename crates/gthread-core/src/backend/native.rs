//! Built-in backend on `std::thread`, with `libc` for naming and scheduling.

#![allow(unsafe_code)]

use std::panic;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use super::{SchedulerSettings, SpawnRequest, SystemThread, ThreadBackend, ThreadExit};
use crate::beacon::LifetimeBeacon;
use crate::error::ThreadError;

/// Linux limits thread names to 15 bytes plus the terminator.
#[cfg(target_os = "linux")]
const MAX_THREAD_NAME: usize = 15;

#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

fn sanitize_name(name: &str) -> &str {
    name.split('\0').next().unwrap_or_default()
}

impl ThreadBackend for NativeBackend {
    fn create(&self, request: SpawnRequest) -> Result<SystemThread, ThreadError> {
        let mut builder = thread::Builder::new();
        if let Some(name) = request.name.as_deref() {
            builder = builder.name(sanitize_name(name).to_owned());
        }
        if request.stack_size > 0 {
            builder = builder.stack_size(request.stack_size);
        }
        builder
            .spawn(request.entry)
            .map(|handle| Box::new(handle) as SystemThread)
            .map_err(ThreadError::from_io)
    }

    fn detach(&self, thread: SystemThread) {
        drop(thread);
    }

    fn wait(&self, thread: SystemThread) {
        let handle = match thread.downcast::<JoinHandle<()>>() {
            Ok(handle) => handle,
            Err(_) => panic!("native backend asked to wait on a foreign thread handle"),
        };
        if let Err(payload) = handle.join() {
            panic::resume_unwind(payload);
        }
    }

    fn exit_current(&self) -> ! {
        panic::resume_unwind(Box::new(ThreadExit))
    }

    #[cfg(target_os = "linux")]
    fn set_name(&self, name: &str) {
        let name = sanitize_name(name);
        let mut end = name.len().min(MAX_THREAD_NAME);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let Ok(cname) = std::ffi::CString::new(&name[..end]) else {
            return;
        };
        // SAFETY: `cname` is NUL-terminated and within the kernel limit.
        let rc = unsafe { libc::pthread_setname_np(libc::pthread_self(), cname.as_ptr()) };
        if rc != 0 {
            tracing::debug!(errno = rc, "pthread_setname_np failed");
        }
    }

    fn yield_now(&self) {
        thread::yield_now();
    }

    #[cfg(unix)]
    fn scheduler_settings(&self) -> Option<SchedulerSettings> {
        let mut policy = 0;
        // SAFETY: sched_param is plain old data.
        let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
        // SAFETY: both out-parameters are valid for writes.
        let rc = unsafe { libc::pthread_getschedparam(libc::pthread_self(), &mut policy, &mut param) };
        (rc == 0).then_some(SchedulerSettings {
            policy,
            priority: param.sched_priority,
        })
    }

    #[cfg(unix)]
    fn apply_scheduler_settings(&self, settings: &SchedulerSettings) {
        // SAFETY: sched_param is plain old data.
        let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
        param.sched_priority = settings.priority;
        // SAFETY: `param` is a valid, initialized sched_param.
        let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), settings.policy, &param) };
        if rc != 0 {
            tracing::debug!(
                errno = rc,
                policy = settings.policy,
                priority = settings.priority,
                "could not apply inherited scheduler settings"
            );
        }
    }

    fn beacon_new(&self) -> Box<dyn LifetimeBeacon> {
        let exited = LIFETIME_ANCHOR
            .try_with(|anchor| Arc::clone(&anchor.0))
            .unwrap_or_else(|_| Arc::new(AtomicBool::new(true)));
        Box::new(NativeBeacon(exited))
    }
}

// ---------------------------------------------------------------------------
// Lifetime beacon
// ---------------------------------------------------------------------------

/// Flips its flag when the owning thread's locals are destroyed.
struct LifetimeAnchor(Arc<AtomicBool>);

impl Drop for LifetimeAnchor {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

thread_local! {
    static LIFETIME_ANCHOR: LifetimeAnchor = LifetimeAnchor(Arc::new(AtomicBool::new(false)));
}

struct NativeBeacon(Arc<AtomicBool>);

impl LifetimeBeacon for NativeBeacon {
    fn has_exited(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
