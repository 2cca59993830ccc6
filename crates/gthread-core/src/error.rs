//! Error types and the fatal-failure path.
//!
//! Only thread creation reports a recoverable error. Misuse of a primitive
//! panics, and an OS primitive failing in a way it is documented not to
//! fails through [`thread_abort`].

use std::io;

use thiserror::Error;

/// Failure to create a thread.
#[derive(Debug, Error)]
pub enum ThreadError {
    /// The system lacked the resources to create another thread. Retrying
    /// later may succeed.
    #[error("error creating thread: resource temporarily unavailable ({0})")]
    Again(#[source] io::Error),
    /// The system refused the thread for a reason retrying will not fix.
    #[error("error creating thread: {0}")]
    Os(#[source] io::Error),
}

impl ThreadError {
    /// Classify an I/O error returned by the thread-creation call.
    #[must_use]
    pub fn from_io(err: io::Error) -> Self {
        let retryable = matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::OutOfMemory
        ) || matches!(err.raw_os_error(), Some(libc::EAGAIN | libc::ENOMEM));
        if retryable {
            Self::Again(err)
        } else {
            Self::Os(err)
        }
    }

    /// Build an error from a raw errno value reported by a host backend.
    #[must_use]
    pub fn from_errno(errno: i32) -> Self {
        Self::from_io(io::Error::from_raw_os_error(errno))
    }

    /// Whether the failure was resource exhaustion.
    #[must_use]
    pub fn is_again(&self) -> bool {
        matches!(self, Self::Again(_))
    }

    /// errno-style code for the C boundary.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::Again(_) => libc::EAGAIN,
            Self::Os(err) => err.raw_os_error().unwrap_or(libc::EINVAL),
        }
    }
}

/// Failure to install an allocation vtable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemVTableError {
    /// A vtable was already installed, or the layer already allocated
    /// through the default one.
    #[error("allocation vtable can only be set once, before the first allocation")]
    AlreadySet,
}

/// Log an unrecoverable OS failure and abort the process.
#[cold]
pub(crate) fn thread_abort(status: i32, function: &str) -> ! {
    tracing::error!(
        status,
        function,
        "unexpected error from system threading call; aborting"
    );
    std::process::abort()
}
