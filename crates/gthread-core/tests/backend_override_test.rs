//! A host-supplied backend installed before first use receives every OS
//! thread operation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use gthread_core::backend::native::NativeBackend;
use gthread_core::{
    Beacon, Config, LifetimeBeacon, SchedulerSettings, SpawnRequest, SystemThread, ThreadBackend,
    ThreadError, global_metrics, thread,
};

#[derive(Default)]
struct Calls {
    create: AtomicUsize,
    detach: AtomicUsize,
    wait: AtomicUsize,
    exit: AtomicUsize,
    set_name: AtomicUsize,
    yield_now: AtomicUsize,
    beacon: AtomicUsize,
    apply_scheduler: AtomicUsize,
}

/// Delegates to the built-in backend, counting calls; can be told to refuse
/// thread creation.
#[derive(Default)]
struct RecordingBackend {
    calls: Calls,
    refuse_with: AtomicUsize,
    inner: NativeBackend,
}

impl ThreadBackend for RecordingBackend {
    fn create(&self, request: SpawnRequest) -> Result<SystemThread, ThreadError> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        match self.refuse_with.load(Ordering::SeqCst) {
            0 => self.inner.create(request),
            errno => Err(ThreadError::from_errno(errno as i32)),
        }
    }

    fn detach(&self, thread: SystemThread) {
        self.calls.detach.fetch_add(1, Ordering::SeqCst);
        self.inner.detach(thread);
    }

    fn wait(&self, thread: SystemThread) {
        self.calls.wait.fetch_add(1, Ordering::SeqCst);
        self.inner.wait(thread);
    }

    fn exit_current(&self) -> ! {
        self.calls.exit.fetch_add(1, Ordering::SeqCst);
        self.inner.exit_current()
    }

    fn set_name(&self, name: &str) {
        self.calls.set_name.fetch_add(1, Ordering::SeqCst);
        self.inner.set_name(name);
    }

    fn yield_now(&self) {
        self.calls.yield_now.fetch_add(1, Ordering::SeqCst);
        self.inner.yield_now();
    }

    fn apply_scheduler_settings(&self, settings: &SchedulerSettings) {
        self.calls.apply_scheduler.fetch_add(1, Ordering::SeqCst);
        let _ = settings;
    }

    fn beacon_new(&self) -> Box<dyn LifetimeBeacon> {
        self.calls.beacon.fetch_add(1, Ordering::SeqCst);
        self.inner.beacon_new()
    }
}

static BACKEND: OnceLock<Arc<RecordingBackend>> = OnceLock::new();
static TEST_GUARD_HELD: AtomicBool = AtomicBool::new(false);

struct TestGuard;

impl Drop for TestGuard {
    fn drop(&mut self) {
        TEST_GUARD_HELD.store(false, Ordering::Release);
    }
}

fn acquire_test_guard() -> TestGuard {
    loop {
        if TEST_GUARD_HELD
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return TestGuard;
        }
        std::thread::yield_now();
    }
}

fn backend() -> &'static RecordingBackend {
    let backend = BACKEND.get_or_init(|| {
        let backend = Arc::new(RecordingBackend::default());
        gthread_core::init_with(Config::new().backend(Arc::clone(&backend) as Arc<dyn ThreadBackend>));
        backend
    });
    backend
}

fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

#[test]
fn spawn_join_and_exit_go_through_the_backend() {
    let b = backend();
    let _guard = acquire_test_guard();
    let (create, wait, exit, set_name) = (
        count(&b.calls.create),
        count(&b.calls.wait),
        count(&b.calls.exit),
        count(&b.calls.set_name),
    );

    let t = thread::Builder::new()
        .name("recorded")
        .spawn(|| thread::exit(3))
        .expect("spawn");
    assert_eq!(t.join(), 3);

    assert_eq!(count(&b.calls.create), create + 1);
    assert_eq!(count(&b.calls.wait), wait + 1);
    assert_eq!(count(&b.calls.exit), exit + 1);
    assert_eq!(count(&b.calls.set_name), set_name + 1);
}

#[test]
fn dropped_handle_detaches_through_the_backend() {
    let b = backend();
    let _guard = acquire_test_guard();
    let detach = count(&b.calls.detach);
    let (tx, rx) = std::sync::mpsc::channel();
    let t = thread::spawn(move || {
        rx.recv().expect("go");
        0
    })
    .expect("spawn");
    drop(t);
    assert_eq!(count(&b.calls.detach), detach);
    tx.send(()).expect("send");
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while count(&b.calls.detach) == detach {
        assert!(std::time::Instant::now() < deadline, "thread never detached");
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
}

#[test]
fn refused_creation_is_reported_as_retryable() {
    let b = backend();
    let _guard = acquire_test_guard();
    let failures = global_metrics().snapshot().spawn_failures;
    b.refuse_with.store(libc::EAGAIN as usize, Ordering::SeqCst);
    let result = thread::spawn(|| 0);
    b.refuse_with.store(0, Ordering::SeqCst);

    let err = result.expect_err("creation must fail");
    assert!(err.is_again());
    assert_eq!(err.errno(), libc::EAGAIN);
    assert!(err.to_string().contains("resource temporarily unavailable"));
    assert_eq!(global_metrics().snapshot().spawn_failures, failures + 1);
}

#[test]
fn refused_creation_with_other_errno_is_not_retryable() {
    let b = backend();
    let _guard = acquire_test_guard();
    b.refuse_with.store(libc::EPERM as usize, Ordering::SeqCst);
    let result = thread::spawn(|| 0);
    b.refuse_with.store(0, Ordering::SeqCst);

    let err = result.expect_err("creation must fail");
    assert!(!err.is_again());
    assert_eq!(err.errno(), libc::EPERM);
}

#[test]
fn explicit_scheduler_settings_are_applied_on_the_new_thread() {
    let b = backend();
    let _guard = acquire_test_guard();
    let applied = count(&b.calls.apply_scheduler);
    thread::Builder::new()
        .scheduler_settings(SchedulerSettings {
            policy: 0,
            priority: 0,
        })
        .spawn(|| 0)
        .expect("spawn")
        .join();
    assert_eq!(count(&b.calls.apply_scheduler), applied + 1);
}

#[test]
fn yield_and_beacon_use_the_backend() {
    let b = backend();
    let _guard = acquire_test_guard();
    let (yields, beacons) = (count(&b.calls.yield_now), count(&b.calls.beacon));
    thread::yield_now();
    let beacon = Beacon::for_current_thread();
    assert!(!beacon.has_exited());
    assert_eq!(count(&b.calls.yield_now), yields + 1);
    assert_eq!(count(&b.calls.beacon), beacons + 1);
}

#[test]
fn late_backend_is_ignored() {
    let _ = backend();
    assert!(!gthread_core::init_with(
        Config::new().backend(Arc::new(NativeBackend) as Arc<dyn ThreadBackend>)
    ));
}
