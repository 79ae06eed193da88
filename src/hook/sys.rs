//! The un-hooked system calls.
//!
//! With the `interpose` feature the crate exports symbols named after the
//! libc functions it hooks, so a plain `libc::read` from inside the crate
//! would land in the hook again. Everything the runtime itself needs goes
//! through [`real`] instead, which resolves the next definition in link
//! order with `dlsym(RTLD_NEXT, ..)`. Without the feature these are simply
//! libc's functions.

use libc::{c_int, c_void, iovec, msghdr, size_t, sockaddr, socklen_t, ssize_t};
#[cfg(feature = "interpose")]
use libc::{c_uint, useconds_t};
use std::sync::OnceLock;

#[cfg(feature = "interpose")]
macro_rules! resolve {
    ($name:ident) => {{
        let symbol = unsafe {
            libc::dlsym(
                libc::RTLD_NEXT,
                concat!(stringify!($name), "\0").as_ptr().cast(),
            )
        };
        crate::utils::invariant!(
            !symbol.is_null(),
            "dlsym could not resolve {}",
            stringify!($name)
        );

        unsafe { std::mem::transmute::<*mut c_void, _>(symbol) }
    }};
}

#[cfg(not(feature = "interpose"))]
macro_rules! resolve {
    ($name:ident) => {
        libc::$name as _
    };
}

/// Function pointers to the real implementations of the hooked calls.
pub(crate) struct Real {
    pub(crate) read: unsafe extern "C" fn(c_int, *mut c_void, size_t) -> ssize_t,
    pub(crate) readv: unsafe extern "C" fn(c_int, *const iovec, c_int) -> ssize_t,
    pub(crate) recv: unsafe extern "C" fn(c_int, *mut c_void, size_t, c_int) -> ssize_t,
    pub(crate) recvfrom:
        unsafe extern "C" fn(c_int, *mut c_void, size_t, c_int, *mut sockaddr, *mut socklen_t) -> ssize_t,
    pub(crate) recvmsg: unsafe extern "C" fn(c_int, *mut msghdr, c_int) -> ssize_t,
    pub(crate) write: unsafe extern "C" fn(c_int, *const c_void, size_t) -> ssize_t,
    pub(crate) writev: unsafe extern "C" fn(c_int, *const iovec, c_int) -> ssize_t,
    pub(crate) send: unsafe extern "C" fn(c_int, *const c_void, size_t, c_int) -> ssize_t,
    pub(crate) sendto:
        unsafe extern "C" fn(c_int, *const c_void, size_t, c_int, *const sockaddr, socklen_t) -> ssize_t,
    pub(crate) sendmsg: unsafe extern "C" fn(c_int, *const msghdr, c_int) -> ssize_t,
    pub(crate) accept: unsafe extern "C" fn(c_int, *mut sockaddr, *mut socklen_t) -> c_int,
    pub(crate) connect: unsafe extern "C" fn(c_int, *const sockaddr, socklen_t) -> c_int,
    pub(crate) socket: unsafe extern "C" fn(c_int, c_int, c_int) -> c_int,
    pub(crate) close: unsafe extern "C" fn(c_int) -> c_int,
    pub(crate) fcntl: unsafe extern "C" fn(c_int, c_int, ...) -> c_int,
    #[cfg(feature = "interpose")]
    pub(crate) sleep: unsafe extern "C" fn(c_uint) -> c_uint,
    #[cfg(feature = "interpose")]
    pub(crate) usleep: unsafe extern "C" fn(useconds_t) -> c_int,
}

fn load() -> Real {
    Real {
        read: resolve!(read),
        readv: resolve!(readv),
        recv: resolve!(recv),
        recvfrom: resolve!(recvfrom),
        recvmsg: resolve!(recvmsg),
        write: resolve!(write),
        writev: resolve!(writev),
        send: resolve!(send),
        sendto: resolve!(sendto),
        sendmsg: resolve!(sendmsg),
        accept: resolve!(accept),
        connect: resolve!(connect),
        socket: resolve!(socket),
        close: resolve!(close),
        fcntl: resolve!(fcntl),
        #[cfg(feature = "interpose")]
        sleep: resolve!(sleep),
        #[cfg(feature = "interpose")]
        usleep: resolve!(usleep),
    }
}

/// Returns the real system call table, resolving it on first use.
pub(crate) fn real() -> &'static Real {
    static REAL: OnceLock<Real> = OnceLock::new();

    REAL.get_or_init(load)
}
