//! Synchronization primitives.
//!
//! Every primitive is `#[repr(C)]`, statically zero-initializable, and
//! usable without a prior call to [`crate::init`].

pub mod cond;
pub mod mutex;
pub mod rec_mutex;
pub mod rwlock;
pub(crate) mod waiter;

pub use cond::Cond;
pub use mutex::Mutex;
pub use rec_mutex::RecMutex;
pub use rwlock::RwLock;
