use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use gthread_core::{Cond, Mutex, RwLock};

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
        thread::yield_now();
    }
}

fn wait_until(label: &str, timeout: Duration, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !done() {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {label} after {timeout:?}"
        );
        thread::sleep(Duration::from_millis(1));
    }
}

#[derive(Default)]
struct Occupancy {
    readers: AtomicUsize,
    writers: AtomicUsize,
    max_readers: AtomicUsize,
    violations: AtomicUsize,
}

#[test]
fn readers_and_writers_never_overlap() {
    let _guard = acquire_test_guard();
    const READERS: usize = 6;
    const WRITERS: usize = 3;
    const ROUNDS: usize = 2_000;

    let lock = Arc::new(RwLock::new());
    let occ = Arc::new(Occupancy::default());
    let start = Arc::new(Barrier::new(READERS + WRITERS));
    let mut handles = Vec::new();

    for _ in 0..READERS {
        let (lock, occ, start) = (Arc::clone(&lock), Arc::clone(&occ), Arc::clone(&start));
        handles.push(thread::spawn(move || {
            start.wait();
            for _ in 0..ROUNDS {
                lock.reader_lock();
                let now = occ.readers.fetch_add(1, Ordering::SeqCst) + 1;
                occ.max_readers.fetch_max(now, Ordering::SeqCst);
                if occ.writers.load(Ordering::SeqCst) != 0 {
                    occ.violations.fetch_add(1, Ordering::SeqCst);
                }
                occ.readers.fetch_sub(1, Ordering::SeqCst);
                lock.reader_unlock();
            }
        }));
    }
    for _ in 0..WRITERS {
        let (lock, occ, start) = (Arc::clone(&lock), Arc::clone(&occ), Arc::clone(&start));
        handles.push(thread::spawn(move || {
            start.wait();
            for _ in 0..ROUNDS {
                lock.writer_lock();
                if occ.writers.fetch_add(1, Ordering::SeqCst) != 0
                    || occ.readers.load(Ordering::SeqCst) != 0
                {
                    occ.violations.fetch_add(1, Ordering::SeqCst);
                }
                occ.writers.fetch_sub(1, Ordering::SeqCst);
                lock.writer_unlock();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(occ.violations.load(Ordering::SeqCst), 0);
    assert!(occ.max_readers.load(Ordering::SeqCst) >= 1);
}

#[test]
fn concurrent_readers_share_the_lock() {
    let lock = Arc::new(RwLock::new());
    lock.reader_lock();
    let other = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            let got = lock.reader_trylock();
            if got {
                lock.reader_unlock();
            }
            got
        })
        .join()
        .unwrap()
    };
    assert!(other);
    assert!(!lock.writer_trylock());
    lock.reader_unlock();
    assert!(lock.writer_trylock());
    assert!(!lock.reader_trylock());
    lock.writer_unlock();
}

#[test]
fn timed_wait_without_signal_times_out_near_deadline() {
    let _guard = acquire_test_guard();
    let cond = Cond::new();
    let mutex = Mutex::new();
    mutex.lock();
    let start = Instant::now();
    let signalled = cond.wait_timeout(&mutex, Duration::from_millis(50));
    let elapsed = start.elapsed();
    assert!(!signalled);
    assert!(mutex.is_locked(), "mutex must be held again after a timeout");
    mutex.unlock();
    assert!(elapsed >= Duration::from_millis(50), "woke early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(150), "woke late: {elapsed:?}");
}

#[test]
fn wait_until_past_deadline_returns_immediately() {
    let cond = Cond::new();
    let mutex = Mutex::new();
    mutex.lock();
    let past = Instant::now();
    assert!(!cond.wait_until(&mutex, past));
    assert!(mutex.is_locked());
    mutex.unlock();
}

#[test]
fn broadcast_releases_every_waiter() {
    let _guard = acquire_test_guard();
    const WAITERS: usize = 8;

    let cond = Arc::new(Cond::new());
    let mutex = Arc::new(Mutex::new());
    let go = Arc::new(AtomicBool::new(false));
    let parked = Arc::new(AtomicUsize::new(0));
    let woken = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let (cond, mutex, go, parked, woken) = (
                Arc::clone(&cond),
                Arc::clone(&mutex),
                Arc::clone(&go),
                Arc::clone(&parked),
                Arc::clone(&woken),
            );
            thread::spawn(move || {
                mutex.lock();
                parked.fetch_add(1, Ordering::SeqCst);
                while !go.load(Ordering::SeqCst) {
                    cond.wait(&mutex);
                }
                woken.fetch_add(1, Ordering::SeqCst);
                mutex.unlock();
            })
        })
        .collect();

    wait_until("waiters to park", Duration::from_secs(5), || {
        parked.load(Ordering::SeqCst) == WAITERS
    });
    mutex.lock();
    go.store(true, Ordering::SeqCst);
    cond.broadcast();
    mutex.unlock();

    wait_until("broadcast wakeups", Duration::from_secs(5), || {
        woken.load(Ordering::SeqCst) == WAITERS
    });
    for h in handles {
        h.join().unwrap();
    }
}
