//! Blocking-style reads and writes that park the calling fiber.
//!
//! Every call funnels through [`do_io`]: when the caller is a fiber on a
//! hooked reactor thread and the descriptor is a socket the user did not
//! mark non-blocking, a would-block result parks the fiber on the reactor
//! until the descriptor is ready or the socket's `SO_RCVTIMEO` /
//! `SO_SNDTIMEO` expires. Otherwise the real system call runs unchanged.

use crate::fiber::Fiber;
use crate::hook::fd::FdTable;
use crate::hook::sys::real;
use crate::net::utils::{sockaddr_to_socketaddr, socketaddr_to_sockaddr};
use crate::reactor::{Direction, ReactorHandle};
use crate::runtime::context;
use crate::utils::{cvt, errno, would_block};

use libc::{SO_RCVTIMEO, SO_SNDTIMEO, c_int};
use std::io::{self, IoSlice, IoSliceMut};
use std::mem;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::trace;

/// Runs `call` with the park-and-retry loop of the hook layer.
///
/// `call` follows the libc convention: a negative return means failure with
/// the reason in `errno`.
pub(crate) fn do_io<F>(fd: RawFd, direction: Direction, timeout_option: c_int, mut call: F) -> io::Result<usize>
where
    F: FnMut() -> isize,
{
    let Some(reactor) = parking_reactor() else {
        return cvt(call());
    };
    let Some(context) = FdTable::global().get(fd, true) else {
        return cvt(call());
    };

    if context.is_closed() {
        return Err(io::Error::from_raw_os_error(libc::EBADF));
    }
    if !context.is_socket() || context.user_nonblock() {
        return cvt(call());
    }

    let timeout = socket_timeout(fd, timeout_option);

    loop {
        let n = call();
        if n >= 0 {
            return Ok(n as usize);
        }

        let code = errno();
        if code == libc::EINTR {
            continue;
        }
        if !would_block(code) {
            return Err(io::Error::from_raw_os_error(code));
        }

        trace!(fd, ?direction, ?timeout, "would block; parking fiber");
        wait_ready(&reactor, fd, direction, timeout)?;

        if context.is_closed() {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
    }
}

/// Returns the reactor to park on when the caller may be suspended.
///
/// That requires interception to be enabled on this thread, a reactor to
/// work for, and a fiber (not the thread's main stack) to suspend.
pub(crate) fn parking_reactor() -> Option<ReactorHandle> {
    if !context::is_hooked() || !Fiber::in_fiber() {
        return None;
    }

    context::reactor()
}

/// Parks the calling fiber until `fd` is ready for `direction`.
///
/// A timeout clock races the readiness event and only reports a timeout if
/// it still finds the direction armed. The clock holds a weak reference to
/// the shared flag, so once this frame returns a late clock does nothing.
///
/// # Errors
/// `ETIMEDOUT` when the clock won, `ECANCELED` when the reactor is stopping,
/// or the registration error from epoll.
pub(crate) fn wait_ready(
    reactor: &ReactorHandle,
    fd: RawFd,
    direction: Direction,
    timeout: Option<Duration>,
) -> io::Result<()> {
    let timed_out = Arc::new(AtomicBool::new(false));

    let clock = timeout.map(|timeout| {
        let flag = Arc::downgrade(&timed_out);
        let waker = reactor.clone();

        reactor.add_cond_clock(
            timeout,
            move || {
                if let Some(flag) = flag.upgrade() {
                    // Readiness may have disarmed the direction first; then the data wins.
                    waker.expire_event(fd, direction, || flag.store(true, Ordering::Release));
                }
            },
            Arc::downgrade(&timed_out),
            false,
        )
    });

    if let Err(error) = reactor.add_event(fd, direction) {
        if let Some(clock) = &clock {
            clock.cancel();
        }
        return Err(error.into());
    }

    Fiber::yield_now();

    if let Some(clock) = &clock {
        clock.cancel();
    }

    if timed_out.load(Ordering::Acquire) {
        trace!(fd, ?direction, "hooked call timed out");
        return Err(io::Error::from_raw_os_error(libc::ETIMEDOUT));
    }

    Ok(())
}

/// Reads `SO_RCVTIMEO` / `SO_SNDTIMEO`; zero or an unreadable option means no timeout.
pub(crate) fn socket_timeout(fd: RawFd, option: c_int) -> Option<Duration> {
    let mut value: libc::timeval = unsafe { mem::zeroed() };
    let mut len = size_of::<libc::timeval>() as libc::socklen_t;

    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            (&mut value as *mut libc::timeval).cast(),
            &mut len,
        )
    };
    if rc != 0 {
        return None;
    }

    let timeout = Duration::from_secs(value.tv_sec.max(0) as u64)
        + Duration::from_micros(value.tv_usec.max(0) as u64);

    (!timeout.is_zero()).then_some(timeout)
}

/// Hooked `read(2)`.
pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    do_io(fd, Direction::Read, SO_RCVTIMEO, || unsafe {
        (real().read)(fd, buf.as_mut_ptr().cast(), buf.len())
    })
}

/// Hooked `readv(2)`.
pub fn readv(fd: RawFd, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
    let count = bufs.len().min(c_int::MAX as usize) as c_int;

    // IoSliceMut is ABI compatible with iovec.
    do_io(fd, Direction::Read, SO_RCVTIMEO, || unsafe {
        (real().readv)(fd, bufs.as_ptr().cast(), count)
    })
}

/// Hooked `recv(2)`.
pub fn recv(fd: RawFd, buf: &mut [u8], flags: c_int) -> io::Result<usize> {
    do_io(fd, Direction::Read, SO_RCVTIMEO, || unsafe {
        (real().recv)(fd, buf.as_mut_ptr().cast(), buf.len(), flags)
    })
}

/// Hooked `recvfrom(2)`, returning the sender's address when it has an IP family.
pub fn recvfrom(fd: RawFd, buf: &mut [u8], flags: c_int) -> io::Result<(usize, Option<SocketAddr>)> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = size_of::<libc::sockaddr_storage>() as libc::socklen_t;

    let n = do_io(fd, Direction::Read, SO_RCVTIMEO, || unsafe {
        (real().recvfrom)(
            fd,
            buf.as_mut_ptr().cast(),
            buf.len(),
            flags,
            (&mut storage as *mut libc::sockaddr_storage).cast(),
            &mut len,
        )
    })?;

    Ok((n, sockaddr_to_socketaddr(&storage, len)))
}

/// Hooked `recvmsg(2)`.
///
/// # Safety
/// `msg` must describe valid buffers for the duration of the call.
pub unsafe fn recvmsg(fd: RawFd, msg: &mut libc::msghdr, flags: c_int) -> io::Result<usize> {
    do_io(fd, Direction::Read, SO_RCVTIMEO, || unsafe { (real().recvmsg)(fd, msg, flags) })
}

/// Hooked `write(2)`.
pub fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    do_io(fd, Direction::Write, SO_SNDTIMEO, || unsafe {
        (real().write)(fd, buf.as_ptr().cast(), buf.len())
    })
}

/// Hooked `writev(2)`.
pub fn writev(fd: RawFd, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
    let count = bufs.len().min(c_int::MAX as usize) as c_int;

    do_io(fd, Direction::Write, SO_SNDTIMEO, || unsafe {
        (real().writev)(fd, bufs.as_ptr().cast(), count)
    })
}

/// Hooked `send(2)`.
pub fn send(fd: RawFd, buf: &[u8], flags: c_int) -> io::Result<usize> {
    do_io(fd, Direction::Write, SO_SNDTIMEO, || unsafe {
        (real().send)(fd, buf.as_ptr().cast(), buf.len(), flags)
    })
}

/// Hooked `sendto(2)`.
pub fn sendto(fd: RawFd, buf: &[u8], flags: c_int, target: &SocketAddr) -> io::Result<usize> {
    let (storage, len) = socketaddr_to_sockaddr(target);

    do_io(fd, Direction::Write, SO_SNDTIMEO, || unsafe {
        (real().sendto)(
            fd,
            buf.as_ptr().cast(),
            buf.len(),
            flags,
            (&storage as *const libc::sockaddr_storage).cast(),
            len,
        )
    })
}

/// Hooked `sendmsg(2)`.
///
/// # Safety
/// `msg` must describe valid buffers for the duration of the call.
pub unsafe fn sendmsg(fd: RawFd, msg: &libc::msghdr, flags: c_int) -> io::Result<usize> {
    do_io(fd, Direction::Write, SO_SNDTIMEO, || unsafe { (real().sendmsg)(fd, msg, flags) })
}
