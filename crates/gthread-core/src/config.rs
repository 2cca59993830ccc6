//! Primitive implementation and backend selection.
//!
//! The implementation is fixed once, at init, from [`Config::implementation`]
//! or the `GTHREAD_RUST_IMPL` environment variable:
//! - `auto` (default): native reader-writer lock and condition variable
//!   wherever the platform provides them.
//! - `native`: require the native primitives.
//! - `emulated`: software reader-writer lock and condition variable built from
//!   a reentrant critical section, auto-reset events, and per-thread waiter
//!   nodes.
//!
//! An explicit `Native` or `Emulated` in the config wins over the environment.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::backend::ThreadBackend;

/// Which reader-writer lock and condition variable implementation to use.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Implementation {
    /// Probe the platform and prefer the native primitives.
    #[default]
    Auto,
    /// Native primitives.
    Native,
    /// Software emulation.
    Emulated,
}

impl Implementation {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "os" | "system" | "srw" => Self::Native,
            "emulated" | "emulation" | "xp" | "soft" | "software" => Self::Emulated,
            _ => Self::Auto,
        }
    }

    /// Resolve `Auto` against the platform. Never returns `Auto`.
    #[must_use]
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto => {
                if native_primitives_available() {
                    Self::Native
                } else {
                    Self::Emulated
                }
            }
            other => other,
        }
    }

    #[must_use]
    pub const fn is_emulated(self) -> bool {
        matches!(self, Self::Emulated)
    }

    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Native => 1,
            Self::Emulated => 2,
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Native,
            2 => Self::Emulated,
            _ => Self::Auto,
        }
    }
}

/// Every supported target has a parking-based reader-writer lock and a
/// futex or parking-lot condition variable.
const fn native_primitives_available() -> bool {
    cfg!(any(unix, windows))
}

static ENV_IMPLEMENTATION: OnceLock<Implementation> = OnceLock::new();

/// Implementation requested through `GTHREAD_RUST_IMPL` (read on first call,
/// cached thereafter).
#[must_use]
pub fn env_implementation() -> Implementation {
    *ENV_IMPLEMENTATION.get_or_init(|| {
        std::env::var("GTHREAD_RUST_IMPL")
            .map(|v| Implementation::from_str_loose(&v))
            .unwrap_or_default()
    })
}

/// Settings fixed by the first call to [`crate::init_with`].
#[derive(Clone, Default)]
pub struct Config {
    pub implementation: Implementation,
    /// Host-supplied thread backend. `None` selects the built-in one.
    pub backend: Option<Arc<dyn ThreadBackend>>,
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn implementation(mut self, implementation: Implementation) -> Self {
        self.implementation = implementation;
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn ThreadBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// The implementation this config selects once the environment is taken
    /// into account.
    #[must_use]
    pub fn resolved_implementation(&self) -> Implementation {
        match self.implementation {
            Implementation::Auto => env_implementation().resolve(),
            explicit => explicit,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("implementation", &self.implementation)
            .field("custom_backend", &self.backend.is_some())
            .finish()
    }
}
