//! Helpers shared by every subsystem: invariant checks and `errno` access.

use std::backtrace::Backtrace;
use std::fmt;
use std::io;

/// Checks a runtime invariant and treats a violation as a fatal defect.
///
/// The violation is logged together with a captured backtrace before the
/// thread panics. Used for conditions that can only be broken by a bug in the
/// caller or in the runtime itself (double registration, resuming a fiber in
/// the wrong state, ...), never for operational failures.
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::utils::fatal(format_args!($($arg)+));
        }
    };
}

pub(crate) use invariant;

/// Logs an invariant violation with its backtrace and panics.
#[cold]
#[inline(never)]
pub(crate) fn fatal(message: fmt::Arguments<'_>) -> ! {
    let backtrace = Backtrace::force_capture();
    tracing::error!(%backtrace, "invariant violated: {message}");

    panic!("invariant violated: {message}");
}

/// Returns the calling thread's `errno`.
pub(crate) fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

/// Overwrites the calling thread's `errno`.
#[cfg(feature = "interpose")]
pub(crate) fn set_errno(code: i32) {
    unsafe {
        *libc::__errno_location() = code;
    }
}

/// Converts a libc-style `-1`/`errno` return into an [`io::Result`].
pub(crate) fn cvt(result: isize) -> io::Result<usize> {
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result as usize)
    }
}

/// Same as [`cvt`] for calls returning a C `int`.
pub(crate) fn cvt_int(result: libc::c_int) -> io::Result<libc::c_int> {
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result)
    }
}

/// Converts an [`io::Result`] back into the `-1`/`errno` convention.
///
/// Errors without an OS code are reported as `EIO`.
#[cfg(feature = "interpose")]
pub(crate) fn into_raw(result: io::Result<usize>) -> isize {
    match result {
        Ok(n) => n as isize,
        Err(error) => {
            set_errno(error.raw_os_error().unwrap_or(libc::EIO));
            -1
        }
    }
}

/// Returns true for the `errno` values meaning "retry once the descriptor is ready".
pub(crate) fn would_block(code: i32) -> bool {
    code == libc::EAGAIN || code == libc::EWOULDBLOCK
}
