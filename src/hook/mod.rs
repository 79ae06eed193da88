//! Syscall interception: blocking-style I/O that suspends fibers instead of threads.
//!
//! Interception is enabled per OS thread. Reactor and scheduler workers turn
//! it on when built with `hook(true)` (the default); any other thread can
//! opt in with [`set_hook_enabled`].
//!
//! When enabled, and the caller is a fiber on a reactor worker, a call that
//! would block:
//!
//! 1. arms a timeout clock if the socket has `SO_RCVTIMEO`/`SO_SNDTIMEO` set;
//! 2. registers read or write interest for the descriptor with the reactor;
//! 3. yields the fiber;
//! 4. once resumed, fails with `ETIMEDOUT` if the clock won, or retries the call.
//!
//! Everything else (non-sockets, descriptors the user marked non-blocking,
//! code running on a thread's main stack) goes straight to the system call.
//!
//! The functions here are the safe Rust entry points. With the `interpose`
//! feature the same behaviour is also exported under the libc names
//! (`read`, `write`, `accept`, `connect`, `close`, `fcntl`, `sleep`, ...), so
//! unmodified code linked into the process is intercepted too.
//!
//! # Example
//!
//! ```ignore
//! use fiber_reactor::{Reactor, hook};
//! use std::time::Duration;
//!
//! let reactor = Reactor::new(1)?;
//! reactor.spawn(|| {
//!     // Suspends only this fiber; the worker keeps running other tasks.
//!     hook::sleep(Duration::from_millis(100));
//! });
//! ```

pub mod fd;
mod io;
#[cfg(feature = "interpose")]
mod interpose;
mod sleep;
pub(crate) mod socket;
pub(crate) mod sys;

pub use fd::{FdContext, FdTable};
pub(crate) use io::socket_timeout;
pub use io::{read, readv, recv, recvfrom, recvmsg, send, sendmsg, sendto, write, writev};
pub use sleep::sleep;
pub use socket::{accept, close, connect, fcntl, is_nonblocking, set_nonblocking, socket};

use crate::runtime::context;

/// Returns true when syscall interception is enabled on the calling thread.
pub fn is_hook_enabled() -> bool {
    context::is_hooked()
}

/// Enables or disables syscall interception on the calling thread.
pub fn set_hook_enabled(enabled: bool) {
    context::set_hooked(enabled);
}
