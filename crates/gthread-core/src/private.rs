//! Thread-local "private" values with optional destructors.
//!
//! A [`Private`] is a key: zero-initializable, allocated a slot number on
//! first `set`, and registered in the context so deinit can release it. Slot
//! numbers come from a process-wide counter and are never reused; deinit
//! retires every slot at once by raising the first-live watermark, so keys
//! allocated before it read as unallocated afterwards.
//!
//! Each thread keeps one table entry per slot. On thread exit the entries'
//! destructors run in up to [`PRIVATE_DESTRUCTOR_ITERATIONS`] rounds, normal
//! keys before [`PRIVATE_DESTROY_LAST`] keys in every round.
//!
//! The table sits behind a pointer in a destructor-free thread-local, so it
//! stays reachable while a separate teardown guard runs those rounds on
//! threads this layer did not spawn. Destructors may therefore read and set
//! other keys during teardown; the guard frees the table once the rounds end.

#![allow(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::context;

/// Destructor for a private value.
pub type DestroyNotify = unsafe extern "C" fn(*mut c_void);

/// Run this key's destructor after every normal key's in each round.
pub const PRIVATE_DESTROY_LAST: u32 = 1 << 0;

/// Maximum destructor rounds on thread exit.
pub const PRIVATE_DESTRUCTOR_ITERATIONS: usize = 4;

static NEXT_SLOT: AtomicUsize = AtomicUsize::new(1);
static FIRST_LIVE_SLOT: AtomicUsize = AtomicUsize::new(1);

#[repr(C)]
pub struct Private {
    /// 0 when unallocated; slot numbers below `FIRST_LIVE_SLOT` are retired.
    slot: AtomicUsize,
    notify: Option<DestroyNotify>,
    flags: u32,
}

impl Private {
    #[must_use]
    pub const fn new(notify: Option<DestroyNotify>) -> Self {
        Self::with_flags(notify, 0)
    }

    #[must_use]
    pub const fn with_flags(notify: Option<DestroyNotify>, flags: u32) -> Self {
        Self {
            slot: AtomicUsize::new(0),
            notify,
            flags,
        }
    }

    fn live_slot(&self) -> Option<usize> {
        let slot = self.slot.load(Ordering::Acquire);
        (slot >= FIRST_LIVE_SLOT.load(Ordering::Acquire)).then_some(slot)
    }

    fn slot(&self) -> usize {
        match self.live_slot() {
            Some(slot) => slot,
            None => self.alloc_slot(),
        }
    }

    #[cold]
    fn alloc_slot(&self) -> usize {
        context::with(|ctx| {
            ctx.privates.with_locked(|slots| {
                if let Some(slot) = self.live_slot() {
                    return slot;
                }
                let fresh = NEXT_SLOT.fetch_add(1, Ordering::Relaxed);
                slots.push(fresh);
                self.slot.store(fresh, Ordering::Release);
                fresh
            })
        })
    }

    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.live_slot().is_some()
    }

    /// The calling thread's value, or null if it never set one.
    #[must_use]
    pub fn get(&self) -> *mut c_void {
        let Some(slot) = self.live_slot() else {
            return ptr::null_mut();
        };
        with_table(false, |locals| locals.borrow().get(slot)).unwrap_or(ptr::null_mut())
    }

    /// Store `value` for the calling thread. The previous value is not
    /// destroyed.
    ///
    /// # Safety
    ///
    /// If the key has a destructor, `value` must be null or valid to pass to
    /// it once the thread exits.
    pub unsafe fn set(&self, value: *mut c_void) {
        let slot = self.slot();
        let _ = self.store(slot, value);
    }

    /// Store `value` for the calling thread and destroy the previous value.
    ///
    /// # Safety
    ///
    /// As for [`Private::set`].
    pub unsafe fn replace(&self, value: *mut c_void) {
        let slot = self.slot();
        let old = self.store(slot, value);
        if let (false, Some(notify)) = (old.is_null(), self.notify) {
            // SAFETY: `old` was stored under this key's contract.
            unsafe { notify(old) };
        }
    }

    fn store(&self, slot: usize, value: *mut c_void) -> *mut c_void {
        let entry = Entry {
            value,
            notify: self.notify,
            destroy_last: self.flags & PRIVATE_DESTROY_LAST != 0,
        };
        with_table(true, |locals| locals.borrow_mut().store(slot, entry))
            .unwrap_or(ptr::null_mut())
    }
}

impl Drop for Private {
    fn drop(&mut self) {
        if let Some(slot) = self.live_slot() {
            let _ = context::with_existing(|ctx| ctx.privates.unregister(slot));
        }
    }
}

impl std::fmt::Debug for Private {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Private")
            .field("slot", &self.live_slot())
            .field("has_notify", &self.notify.is_some())
            .field("flags", &self.flags)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Per-thread table
// ---------------------------------------------------------------------------

struct Entry {
    value: *mut c_void,
    notify: Option<DestroyNotify>,
    destroy_last: bool,
}

type Pending = Vec<(DestroyNotify, *mut c_void)>;

#[derive(Default)]
struct ThreadLocals {
    /// Indexed by slot number minus one.
    entries: Vec<Option<Entry>>,
    /// First-live watermark this table was last pruned against.
    floor: usize,
}

impl ThreadLocals {
    fn get(&self, slot: usize) -> *mut c_void {
        self.entries
            .get(slot - 1)
            .and_then(Option::as_ref)
            .map_or(ptr::null_mut(), |e| e.value)
    }

    fn store(&mut self, slot: usize, entry: Entry) -> *mut c_void {
        self.discard_retired();
        let idx = slot - 1;
        if self.entries.len() <= idx {
            self.entries.resize_with(idx + 1, || None);
        }
        self.entries[idx]
            .replace(entry)
            .map_or(ptr::null_mut(), |old| old.value)
    }

    /// Drop entries whose slots deinit retired, without destroying them.
    fn discard_retired(&mut self) {
        let live = FIRST_LIVE_SLOT.load(Ordering::Acquire);
        if self.floor < live {
            for entry in self.entries.iter_mut().take(live - 1) {
                *entry = None;
            }
            self.floor = live;
        }
    }

    fn take_pending(&mut self, destroy_last: bool) -> Pending {
        self.discard_retired();
        self.entries
            .iter_mut()
            .filter_map(|slot| {
                let entry = slot.as_mut()?;
                let notify = entry.notify?;
                if entry.destroy_last != destroy_last || entry.value.is_null() {
                    return None;
                }
                Some((notify, std::mem::replace(&mut entry.value, ptr::null_mut())))
            })
            .collect()
    }
}

type Table = RefCell<ThreadLocals>;

/// Marks a thread whose table the teardown guard already freed.
const TORN_DOWN: *mut Table = ptr::dangling_mut();

thread_local! {
    // No destructor: stays accessible for the whole of thread teardown.
    static LOCALS: Cell<*mut Table> = const { Cell::new(ptr::null_mut()) };
    static TEARDOWN: TeardownGuard = const { TeardownGuard };
}

/// Registered on a thread's first store; runs its destructor rounds and
/// frees its table when the thread's locals are destroyed.
struct TeardownGuard;

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        run_thread_cleanup();
        let table = LOCALS
            .try_with(|locals| locals.replace(TORN_DOWN))
            .unwrap_or(ptr::null_mut());
        if !table.is_null() && table != TORN_DOWN {
            // SAFETY: `table` came from `Box::into_raw` in `with_table` and
            // is no longer reachable through `LOCALS`.
            drop(unsafe { Box::from_raw(table) });
        }
    }
}

/// Run `f` on the calling thread's table. With `create`, a missing table is
/// allocated and the teardown guard registered. `None` when there is no
/// table, including after teardown.
fn with_table<R>(create: bool, f: impl FnOnce(&Table) -> R) -> Option<R> {
    let mut table = LOCALS.try_with(Cell::get).ok()?;
    if table == TORN_DOWN {
        return None;
    }
    if table.is_null() {
        if !create {
            return None;
        }
        TEARDOWN.try_with(|_| ()).ok()?;
        table = Box::into_raw(Box::new(RefCell::new(ThreadLocals::default())));
        LOCALS.set(table);
    }
    // SAFETY: only this thread reaches `table`, and it stays allocated until
    // the teardown guard swaps in `TORN_DOWN`, which no caller can race.
    Some(f(unsafe { &*table }))
}

fn run_destructor_rounds(mut take: impl FnMut(bool) -> Pending) {
    for _ in 0..PRIVATE_DESTRUCTOR_ITERATIONS {
        let mut ran = false;
        for destroy_last in [false, true] {
            for (notify, value) in take(destroy_last) {
                ran = true;
                // SAFETY: values were stored under their key's contract.
                unsafe { notify(value) };
            }
        }
        if !ran {
            break;
        }
    }
}

/// Run the calling thread's pending destructors.
pub(crate) fn run_thread_cleanup() {
    run_destructor_rounds(|destroy_last| {
        with_table(false, |locals| locals.borrow_mut().take_pending(destroy_last))
            .unwrap_or_default()
    });
}

/// Retire every allocated slot.
pub(crate) fn release_all_slots() {
    FIRST_LIVE_SLOT.store(NEXT_SLOT.load(Ordering::Acquire), Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;

    static LOG: Mutex<Vec<(char, usize)>> = Mutex::new(Vec::new());

    unsafe extern "C" fn log_normal(p: *mut c_void) {
        LOG.lock().unwrap().push(('n', p as usize));
    }

    unsafe extern "C" fn log_last(p: *mut c_void) {
        LOG.lock().unwrap().push(('l', p as usize));
    }

    fn take_log(tag_base: usize) -> Vec<(char, usize)> {
        let mut log = LOG.lock().unwrap();
        let (ours, rest): (Vec<_>, Vec<_>) = log
            .drain(..)
            .partition(|(_, v)| *v >= tag_base && *v < tag_base + 1000);
        *log = rest;
        ours
    }

    #[test]
    fn unset_key_reads_null_and_stays_unallocated() {
        let key = Private::new(None);
        assert!(key.get().is_null());
        assert!(!key.is_allocated());
    }

    #[test]
    fn set_then_get_roundtrip() {
        let key = Private::new(None);
        // SAFETY: no destructor.
        unsafe { key.set(0x10 as *mut c_void) };
        assert_eq!(key.get() as usize, 0x10);
        assert!(key.is_allocated());
    }

    #[test]
    fn values_are_per_thread() {
        static KEY: Private = Private::new(None);
        // SAFETY: no destructor.
        unsafe { KEY.set(1 as *mut c_void) };
        let seen = thread::spawn(|| KEY.get() as usize).join().unwrap();
        assert_eq!(seen, 0);
        assert_eq!(KEY.get() as usize, 1);
    }

    #[test]
    fn set_does_not_destroy_previous_value() {
        static KEY: Private = Private::new(Some(log_normal));
        thread::spawn(|| {
            // SAFETY: the logging destructor accepts any pointer.
            unsafe {
                KEY.set(1001 as *mut c_void);
                KEY.set(1002 as *mut c_void);
            }
            assert!(take_log(1000).is_empty());
            run_thread_cleanup();
        })
        .join()
        .unwrap();
        assert_eq!(take_log(1000), vec![('n', 1002)]);
    }

    #[test]
    fn replace_destroys_previous_value_once() {
        static KEY: Private = Private::new(Some(log_normal));
        thread::spawn(|| {
            // SAFETY: the logging destructor accepts any pointer.
            unsafe {
                KEY.replace(2001 as *mut c_void);
                KEY.replace(2002 as *mut c_void);
            }
            assert_eq!(take_log(2000), vec![('n', 2001)]);
        })
        .join()
        .unwrap();
        assert_eq!(take_log(2000), vec![('n', 2002)]);
    }

    #[test]
    fn destroy_last_keys_run_after_normal_keys() {
        static LAST: Private = Private::with_flags(Some(log_last), PRIVATE_DESTROY_LAST);
        static NORMAL: Private = Private::new(Some(log_normal));
        thread::spawn(|| {
            // SAFETY: the logging destructors accept any pointer.
            unsafe {
                LAST.set(3001 as *mut c_void);
                NORMAL.set(3002 as *mut c_void);
            }
        })
        .join()
        .unwrap();
        assert_eq!(take_log(3000), vec![('n', 3002), ('l', 3001)]);
    }

    #[test]
    fn destructor_that_sets_again_gets_another_round() {
        static KEY: Private = Private::new(Some(reset_once));
        unsafe extern "C" fn reset_once(p: *mut c_void) {
            LOG.lock().unwrap().push(('n', p as usize));
            if p as usize == 4001 {
                // SAFETY: the destructor accepts any pointer.
                unsafe { KEY.set(4002 as *mut c_void) };
            }
        }
        thread::spawn(|| {
            // SAFETY: the destructor accepts any pointer.
            unsafe { KEY.set(4001 as *mut c_void) };
            run_thread_cleanup();
        })
        .join()
        .unwrap();
        assert_eq!(take_log(4000), vec![('n', 4001), ('n', 4002)]);
    }
}
