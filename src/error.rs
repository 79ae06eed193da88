//! Operational errors reported by the runtime.
//!
//! Programming errors (double registration, resuming a terminated fiber, ...)
//! are not represented here: they are fatal and go through the internal
//! `invariant!` check instead.

use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

/// Errors returned by scheduler and reactor operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The OS multiplexer rejected a registration change for a descriptor.
    #[error("epoll_ctl({op}) failed for fd {fd}: {source}")]
    Register {
        fd: RawFd,
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The reactor was asked to stop and accepts no new registrations.
    #[error("reactor {name} is shutting down")]
    ShuttingDown { name: String },

    /// A runtime-internal system call failed (epoll_create1, eventfd, thread spawn, ...).
    #[error("{call} failed: {source}")]
    Os {
        call: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn os(call: &'static str, source: io::Error) -> Self {
        Self::Os { call, source }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Register { source, .. } | Error::Os { source, .. } => source,
            Error::ShuttingDown { .. } => io::Error::from_raw_os_error(libc::ECANCELED),
        }
    }
}
