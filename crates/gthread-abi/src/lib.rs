// Every extern "C" export takes raw pointers from C callers and documents
// its contract on the C side.
#![allow(clippy::missing_safety_doc)]
//! # gthread-abi
//!
//! extern "C" boundary for `gthread-core`.
//!
//! This crate produces a `cdylib` exposing the threading layer to C hosts
//! under the `gt_` prefix. Each entry point checks its pointers and hands off
//! to the core implementation:
//!
//! ```text
//! C caller -> gt_* entry (this crate) -> gthread-core -> backend / OS
//! ```
//!
//! Synchronization objects are the core's `#[repr(C)]` types embedded in
//! caller memory. Threads and beacons are opaque pointers. A host may replace
//! the allocator (`gt_mem_set_vtable`) and the OS thread backend
//! (`gt_thread_set_backend`) before the layer is first used.

pub mod backend_abi;
pub mod init_abi;
pub mod mem_abi;
pub mod private_abi;
pub mod sync_abi;
pub mod thread_abi;
mod util;
