#![allow(unsafe_code)]

use std::ffi::c_void;
use std::sync::Mutex;
use std::thread;

use gthread_core::{Private, PRIVATE_DESTROY_LAST, thread as gthread};

static DESTROYED: Mutex<Vec<usize>> = Mutex::new(Vec::new());

unsafe extern "C" fn record_destroy(p: *mut c_void) {
    DESTROYED.lock().unwrap().push(p as usize);
}

fn take_destroyed(range: std::ops::Range<usize>) -> Vec<usize> {
    let mut log = DESTROYED.lock().unwrap();
    let (ours, rest): (Vec<_>, Vec<_>) = log.drain(..).partition(|v| range.contains(v));
    *log = rest;
    ours
}

#[test]
fn destructor_runs_once_per_exiting_thread() {
    static KEY: Private = Private::new(Some(record_destroy));
    const THREADS: usize = 10;

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            gthread::spawn(move || {
                let value = 100 + i;
                // SAFETY: the destructor accepts any pointer.
                unsafe { KEY.set(value as *mut c_void) };
                assert_eq!(KEY.get() as usize, value);
                0
            })
            .expect("spawn")
        })
        .collect();
    for h in handles {
        h.join();
    }

    let mut destroyed = take_destroyed(100..200);
    destroyed.sort_unstable();
    assert_eq!(destroyed, (100..100 + THREADS).collect::<Vec<_>>());
}

#[test]
fn destructor_also_runs_on_foreign_threads() {
    static KEY: Private = Private::new(Some(record_destroy));
    thread::spawn(|| {
        // SAFETY: the destructor accepts any pointer.
        unsafe { KEY.set(300 as *mut c_void) };
    })
    .join()
    .unwrap();
    assert_eq!(take_destroyed(300..400), vec![300]);
}

#[test]
fn null_values_are_not_destroyed() {
    static KEY: Private = Private::new(Some(record_destroy));
    gthread::spawn(|| {
        // SAFETY: null is always acceptable.
        unsafe { KEY.set(std::ptr::null_mut()) };
        assert!(KEY.is_allocated());
        0
    })
    .expect("spawn")
    .join();
    assert!(take_destroyed(0..1).is_empty());
}

#[test]
fn destroy_last_key_outlives_normal_keys_at_exit() {
    static LAST: Private = Private::with_flags(Some(record_destroy), PRIVATE_DESTROY_LAST);
    static NORMAL: Private = Private::new(Some(record_destroy));
    gthread::spawn(|| {
        // SAFETY: the destructor accepts any pointer.
        unsafe {
            LAST.set(501 as *mut c_void);
            NORMAL.set(502 as *mut c_void);
        }
        0
    })
    .expect("spawn")
    .join();
    assert_eq!(take_destroyed(500..600), vec![502, 501]);
}

#[test]
fn exit_runs_destructors_too() {
    static KEY: Private = Private::new(Some(record_destroy));
    let t = gthread::spawn(|| {
        // SAFETY: the destructor accepts any pointer.
        unsafe { KEY.set(701 as *mut c_void) };
        gthread::exit(9)
    })
    .expect("spawn");
    assert_eq!(t.join(), 9);
    assert_eq!(take_destroyed(700..800), vec![701]);
}

#[test]
fn foreign_thread_destructor_that_sets_again_is_rerun() {
    static KEY: Private = Private::new(Some(set_again_once));
    unsafe extern "C" fn set_again_once(p: *mut c_void) {
        DESTROYED.lock().unwrap().push(p as usize);
        if p as usize == 801 {
            // SAFETY: the destructor accepts any pointer.
            unsafe { KEY.set(802 as *mut c_void) };
        }
    }
    thread::spawn(|| {
        // SAFETY: the destructor accepts any pointer.
        unsafe { KEY.set(801 as *mut c_void) };
    })
    .join()
    .unwrap();
    assert_eq!(take_destroyed(800..900), vec![801, 802]);
}

#[test]
fn foreign_thread_normal_destructor_sees_destroy_last_value() {
    static LAST: Private = Private::with_flags(Some(record_destroy), PRIVATE_DESTROY_LAST);
    static NORMAL: Private = Private::new(Some(record_with_last));
    unsafe extern "C" fn record_with_last(p: *mut c_void) {
        // Record what LAST held when this ran.
        DESTROYED.lock().unwrap().push(p as usize);
        DESTROYED.lock().unwrap().push(LAST.get() as usize);
    }
    thread::spawn(|| {
        // SAFETY: the destructors accept any pointer.
        unsafe {
            LAST.set(977 as *mut c_void);
            NORMAL.set(905 as *mut c_void);
        }
    })
    .join()
    .unwrap();
    assert_eq!(take_destroyed(900..1000), vec![905, 977, 977]);
}
