use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread as std_thread;
use std::time::{Duration, Instant};

use gthread_core::thread::{self, Builder, Thread};
use gthread_core::{Beacon, global_metrics};

fn wait_until(label: &str, timeout: Duration, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !done() {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {label} after {timeout:?}"
        );
        std_thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn beacon_reports_exit_without_join() {
    let (tx, rx) = std::sync::mpsc::channel();
    let release = Arc::new(Barrier::new(2));
    let worker = {
        let release = Arc::clone(&release);
        Builder::new()
            .name("beacon-worker")
            .spawn(move || {
                tx.send(Beacon::for_current_thread()).expect("send beacon");
                release.wait();
                0
            })
            .expect("spawn")
    };
    let beacon = rx.recv().expect("beacon");
    assert!(!beacon.has_exited());
    release.wait();
    wait_until("beacon to report exit", Duration::from_secs(5), || {
        beacon.has_exited()
    });
    worker.join();
    assert!(beacon.has_exited());
}

#[test]
fn beacon_on_foreign_thread() {
    let beacon = std_thread::spawn(Beacon::for_current_thread)
        .join()
        .unwrap();
    assert!(beacon.has_exited());
    assert!(!Beacon::for_current_thread().has_exited());
}

#[test]
fn foreign_thread_is_adopted_once_and_not_joinable() {
    std_thread::spawn(|| {
        let a = Thread::current();
        let b = Thread::current();
        assert_eq!(a, b);
        assert!(!a.is_joinable());
        // Held by the thread itself plus the two handles.
        assert_eq!(a.ref_count(), 3);
    })
    .join()
    .unwrap();
}

#[test]
fn clone_and_drop_adjust_ref_count() {
    let gate = Arc::new(Barrier::new(2));
    let t = {
        let gate = Arc::clone(&gate);
        thread::spawn(move || {
            gate.wait();
            0
        })
        .expect("spawn")
    };
    let base = t.ref_count();
    let extra = t.clone();
    assert_eq!(t.ref_count(), base + 1);
    drop(extra);
    assert_eq!(t.ref_count(), base);
    gate.wait();
    t.join();
}

#[test]
fn dropping_unjoined_handle_detaches() {
    let done = Arc::new(AtomicBool::new(false));
    {
        let done = Arc::clone(&done);
        let t = thread::spawn(move || {
            std_thread::sleep(Duration::from_millis(10));
            done.store(true, Ordering::SeqCst);
            0
        })
        .expect("spawn");
        t.detach();
    }
    wait_until("detached thread to finish", Duration::from_secs(5), || {
        done.load(Ordering::SeqCst)
    });
}

#[test]
fn concurrent_joins_through_clones_all_see_result() {
    let t = thread::spawn(|| {
        std_thread::sleep(Duration::from_millis(20));
        99
    })
    .expect("spawn");
    let seen = Arc::new(AtomicUsize::new(0));
    let joiners: Vec<_> = (0..4)
        .map(|_| {
            let t = t.clone();
            let seen = Arc::clone(&seen);
            std_thread::spawn(move || {
                assert_eq!(t.join(), 99);
                seen.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();
    for j in joiners {
        j.join().unwrap();
    }
    assert_eq!(seen.load(Ordering::SeqCst), 4);
    assert_eq!(t.join(), 99);
}

#[test]
fn spawn_counts_in_metrics() {
    let before = global_metrics().snapshot().threads_spawned;
    thread::spawn(|| 0).expect("spawn").join();
    assert!(global_metrics().snapshot().threads_spawned > before);
}

#[test]
fn yield_and_set_name_are_callable_from_any_thread() {
    thread::yield_now();
    std_thread::spawn(|| thread::set_name("renamed-worker"))
        .join()
        .unwrap();
}
