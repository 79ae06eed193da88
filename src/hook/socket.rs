//! Hooked socket lifecycle calls: `socket`, `accept`, `connect`, `close`, `fcntl`.

use crate::hook::fd::FdTable;
use crate::hook::io::{do_io, parking_reactor, wait_ready};
use crate::hook::sys::real;
use crate::net::utils::{sockaddr_to_socketaddr, socketaddr_to_sockaddr};
use crate::reactor::Direction;
use crate::runtime::context;
use crate::utils::{cvt_int, errno};

use libc::{SO_RCVTIMEO, c_int, c_ulong, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use tracing::trace;

/// Hooked `socket(2)`. On hooked threads the new descriptor is registered
/// (and made non-blocking at the OS level) right away.
pub fn socket(domain: c_int, ty: c_int, protocol: c_int) -> io::Result<OwnedFd> {
    let fd = socket_raw(domain, ty, protocol)?;

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub(crate) fn socket_raw(domain: c_int, ty: c_int, protocol: c_int) -> io::Result<RawFd> {
    let fd = cvt_int(unsafe { (real().socket)(domain, ty, protocol) })?;

    if context::is_hooked() {
        FdTable::global().get(fd, true);
    }

    Ok(fd)
}

/// Hooked `accept(2)`: parks the fiber until a connection is pending.
pub fn accept(fd: RawFd) -> io::Result<(OwnedFd, Option<SocketAddr>)> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = size_of::<libc::sockaddr_storage>() as socklen_t;

    let client = unsafe { accept_raw(fd, (&mut storage as *mut libc::sockaddr_storage).cast(), &mut len)? };

    Ok((unsafe { OwnedFd::from_raw_fd(client) }, sockaddr_to_socketaddr(&storage, len)))
}

/// # Safety
/// `address` and `len` follow the `accept(2)` contract (both null, or valid).
pub(crate) unsafe fn accept_raw(fd: RawFd, address: *mut sockaddr, len: *mut socklen_t) -> io::Result<RawFd> {
    let client = do_io(fd, Direction::Read, SO_RCVTIMEO, || unsafe {
        (real().accept)(fd, address, len) as isize
    })? as RawFd;

    if context::is_hooked() {
        FdTable::global().get(client, true);
    }

    Ok(client)
}

/// Hooked `connect(2)` with an explicit timeout; `None` waits indefinitely.
pub fn connect(fd: RawFd, target: &SocketAddr, timeout: Option<Duration>) -> io::Result<()> {
    let (storage, len) = socketaddr_to_sockaddr(target);

    unsafe { connect_raw(fd, (&storage as *const libc::sockaddr_storage).cast(), len, timeout) }
}

/// Timeout applied by hooked `connect` when none is given: the reactor's
/// configured connect timeout.
pub(crate) fn default_connect_timeout() -> Option<Duration> {
    context::reactor().and_then(|reactor| reactor.config().connect_timeout)
}

/// # Safety
/// `address` must point to `len` readable bytes holding a socket address.
pub(crate) unsafe fn connect_raw(
    fd: RawFd,
    address: *const sockaddr,
    len: socklen_t,
    timeout: Option<Duration>,
) -> io::Result<()> {
    let passthrough = || cvt_int(unsafe { (real().connect)(fd, address, len) }).map(drop);

    let Some(reactor) = parking_reactor() else {
        return passthrough();
    };
    let Some(context) = FdTable::global().get(fd, true) else {
        return passthrough();
    };

    if context.is_closed() {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }
    if !context.is_socket() || context.user_nonblock() {
        return passthrough();
    }

    if unsafe { (real().connect)(fd, address, len) } == 0 {
        return Ok(());
    }

    let code = errno();
    if code != libc::EINPROGRESS {
        return Err(io::Error::from_raw_os_error(code));
    }

    trace!(fd, ?timeout, "connect in progress; parking fiber");
    wait_ready(&reactor, fd, Direction::Write, timeout)?;

    match take_socket_error(fd)? {
        0 => Ok(()),
        code => Err(io::Error::from_raw_os_error(code)),
    }
}

fn take_socket_error(fd: RawFd) -> io::Result<c_int> {
    let mut error: c_int = 0;
    let mut len = size_of::<c_int>() as socklen_t;

    cvt_int(unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            (&mut error as *mut c_int).cast(),
            &mut len,
        )
    })?;

    Ok(error)
}

/// Hooked `close(2)`.
///
/// Wakes every fiber parked on the descriptor and forgets its metadata
/// before closing it.
pub fn close(fd: RawFd) -> io::Result<()> {
    // Woken waiters must already see the descriptor as closed.
    FdTable::global().remove(fd);

    if context::is_hooked()
        && let Some(reactor) = context::reactor()
        && reactor.cancel_all(fd)
    {
        trace!(fd, "woke waiters of closing descriptor");
    }

    cvt_int(unsafe { (real().close)(fd) }).map(drop)
}

/// Hooked `fcntl(2)`.
///
/// On hooked threads `F_SETFL` records the caller's `O_NONBLOCK` intent while
/// keeping runtime-managed sockets non-blocking, and `F_GETFL` reports the
/// caller's intent back. Every other command passes through.
///
/// # Safety
/// `arg` must be valid for `cmd` (a pointer for lock and owner commands).
pub unsafe fn fcntl(fd: RawFd, cmd: c_int, arg: c_ulong) -> io::Result<c_int> {
    let passthrough = || cvt_int(unsafe { (real().fcntl)(fd, cmd, arg) });

    if !context::is_hooked() || (cmd != libc::F_SETFL && cmd != libc::F_GETFL) {
        return passthrough();
    }

    let Some(context) = FdTable::global().get(fd, true) else {
        return passthrough();
    };
    if context.is_closed() || !context.is_socket() {
        return passthrough();
    }

    if cmd == libc::F_GETFL {
        let flags = cvt_int(unsafe { (real().fcntl)(fd, libc::F_GETFL) })?;

        return Ok(if context.user_nonblock() {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        });
    }

    let flags = arg as c_int;
    context.set_user_nonblock(flags & libc::O_NONBLOCK != 0);

    let flags = if context.sys_nonblock() {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };

    cvt_int(unsafe { (real().fcntl)(fd, libc::F_SETFL, flags) })
}

/// Sets or clears `O_NONBLOCK` through the hooked `fcntl`.
pub fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, libc::F_GETFL, 0)? };
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };

    unsafe { fcntl(fd, libc::F_SETFL, flags as c_ulong) }.map(drop)
}

/// Reports `O_NONBLOCK` as seen through the hooked `fcntl`.
pub fn is_nonblocking(fd: RawFd) -> io::Result<bool> {
    let flags = unsafe { fcntl(fd, libc::F_GETFL, 0)? };

    Ok(flags & libc::O_NONBLOCK != 0)
}
