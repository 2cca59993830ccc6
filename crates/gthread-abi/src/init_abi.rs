//! Process lifecycle hooks for startup and shutdown wiring.

#![allow(clippy::missing_safety_doc)]

use std::ffi::c_int;

use gthread_core::{Config, Implementation};

pub const GT_IMPLEMENTATION_AUTO: c_int = 0;
pub const GT_IMPLEMENTATION_NATIVE: c_int = 1;
pub const GT_IMPLEMENTATION_EMULATED: c_int = 2;

fn implementation_from_c(raw: c_int) -> Implementation {
    match raw {
        GT_IMPLEMENTATION_NATIVE => Implementation::Native,
        GT_IMPLEMENTATION_EMULATED => Implementation::Emulated,
        _ => Implementation::Auto,
    }
}

const fn implementation_to_c(implementation: Implementation) -> c_int {
    match implementation {
        Implementation::Auto => GT_IMPLEMENTATION_AUTO,
        Implementation::Native => GT_IMPLEMENTATION_NATIVE,
        Implementation::Emulated => GT_IMPLEMENTATION_EMULATED,
    }
}

/// Initialize the layer. Idempotent: returns 1 if this call initialized it,
/// 0 if it was already running. `implementation` is one of the
/// `GT_IMPLEMENTATION_*` values; unknown values mean auto.
#[unsafe(no_mangle)]
pub extern "C" fn gt_thread_init(implementation: c_int) -> c_int {
    let config = Config::new().implementation(implementation_from_c(implementation));
    c_int::from(gthread_core::init_with(config))
}

/// The primitive implementation in use, initializing with defaults first.
#[unsafe(no_mangle)]
pub extern "C" fn gt_thread_implementation() -> c_int {
    implementation_to_c(gthread_core::implementation())
}

/// Tear the layer down. Must not race with any other use of the layer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gt_thread_deinit() {
    // SAFETY: forwarded caller contract.
    unsafe { gthread_core::deinit() };
}
