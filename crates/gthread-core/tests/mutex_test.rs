#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use gthread_core::{Cond, Mutex, RecMutex};

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

/// Plain counter only ever touched under the mutex.
struct Guarded<T> {
    lock: Mutex,
    value: UnsafeCell<T>,
}

// SAFETY: `value` is only accessed with `lock` held.
unsafe impl<T: Send> Sync for Guarded<T> {}

impl<T> Guarded<T> {
    fn new(value: T) -> Self {
        Self {
            lock: Mutex::new(),
            value: UnsafeCell::new(value),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.lock.lock();
        // SAFETY: exclusive access while `lock` is held.
        let r = f(unsafe { &mut *self.value.get() });
        self.lock.unlock();
        r
    }
}

fn run_counter(threads: usize, iterations: usize) -> usize {
    let counter = Arc::new(Guarded::new(0usize));
    let start = Arc::new(Barrier::new(threads));
    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let counter = Arc::clone(&counter);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iterations {
                    counter.with(|c| *c += 1);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    counter.with(|c| *c)
}

#[test]
fn mutual_exclusion_matrix() {
    let _guard = acquire_test_guard();
    for threads in [1, 2, 8, 64] {
        for iterations in [1, 10_000] {
            assert_eq!(
                run_counter(threads, iterations),
                threads * iterations,
                "threads={threads} iterations={iterations}"
            );
        }
    }
}

#[test]
fn trylock_reports_held_and_free() {
    let m = Arc::new(Mutex::new());
    assert!(m.try_lock());
    let other = {
        let m = Arc::clone(&m);
        thread::spawn(move || m.try_lock()).join().unwrap()
    };
    assert!(!other);
    m.unlock();
    let other = {
        let m = Arc::clone(&m);
        thread::spawn(move || {
            let got = m.try_lock();
            if got {
                m.unlock();
            }
            got
        })
        .join()
        .unwrap()
    };
    assert!(other);
}

#[test]
fn static_zeroed_primitives_work_without_init() {
    static M: Mutex = Mutex::new();
    static R: RecMutex = RecMutex::new();
    M.lock();
    M.unlock();
    R.lock();
    R.lock();
    R.unlock();
    R.unlock();
}

#[test]
fn bounded_queue_producer_consumer() {
    let _guard = acquire_test_guard();
    const CAPACITY: usize = 4;
    const ITEMS: usize = 1000;

    struct Channel {
        lock: Mutex,
        not_empty: Cond,
        not_full: Cond,
        queue: UnsafeCell<VecDeque<usize>>,
    }
    // SAFETY: `queue` is only accessed with `lock` held.
    unsafe impl Sync for Channel {}

    let chan = Arc::new(Channel {
        lock: Mutex::new(),
        not_empty: Cond::new(),
        not_full: Cond::new(),
        queue: UnsafeCell::new(VecDeque::new()),
    });

    let producer = {
        let chan = Arc::clone(&chan);
        thread::spawn(move || {
            for item in 0..ITEMS {
                chan.lock.lock();
                // SAFETY: lock held.
                while unsafe { &*chan.queue.get() }.len() == CAPACITY {
                    chan.not_full.wait(&chan.lock);
                }
                // SAFETY: lock held.
                unsafe { &mut *chan.queue.get() }.push_back(item);
                chan.not_empty.signal();
                chan.lock.unlock();
            }
        })
    };

    let mut seen = Vec::with_capacity(ITEMS);
    while seen.len() < ITEMS {
        chan.lock.lock();
        // SAFETY: lock held.
        while unsafe { &*chan.queue.get() }.is_empty() {
            chan.not_empty.wait(&chan.lock);
        }
        // SAFETY: lock held.
        let queue = unsafe { &mut *chan.queue.get() };
        assert!(queue.len() <= CAPACITY);
        seen.extend(queue.drain(..));
        chan.not_full.signal();
        chan.lock.unlock();
    }
    producer.join().unwrap();
    assert_eq!(seen, (0..ITEMS).collect::<Vec<_>>());
}
