use crate::error::{Error, Result};
use crate::hook::sys::real;
use crate::utils::{cvt, cvt_int, errno, would_block};

use libc::{EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, epoll_event};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Token reserved for the wakeup descriptor; channel tokens are descriptor numbers.
pub(crate) const WAKE_TOKEN: u64 = u64::MAX;

/// Thin wrapper over an epoll instance.
pub(crate) struct EpollPoller {
    epoll: OwnedFd,
}

impl EpollPoller {
    pub(crate) fn new() -> Result<Self> {
        let fd = cvt_int(unsafe { libc::epoll_create1(EPOLL_CLOEXEC) })
            .map_err(|source| Error::os("epoll_create1", source))?;

        Ok(Self {
            epoll: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub(crate) fn add(&self, fd: RawFd, token: u64, flags: u32) -> io::Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, token, flags)
    }

    pub(crate) fn modify(&self, fd: RawFd, token: u64, flags: u32) -> io::Result<()> {
        self.ctl(EPOLL_CTL_MOD, fd, token, flags)
    }

    pub(crate) fn delete(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(EPOLL_CTL_DEL, fd, 0, 0)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: u64, flags: u32) -> io::Result<()> {
        let mut event = epoll_event {
            events: flags,
            u64: token,
        };

        cvt_int(unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) })?;
        Ok(())
    }

    /// Waits up to `timeout` (rounded up to whole milliseconds) and fills `events`.
    ///
    /// An interrupted wait reports zero events.
    pub(crate) fn wait(&self, events: &mut Vec<epoll_event>, timeout: Duration) -> io::Result<usize> {
        let timeout_ms = timeout.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as libc::c_int;

        events.clear();
        let n = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                events.as_mut_ptr(),
                events.capacity() as libc::c_int,
                timeout_ms,
            )
        };

        if n < 0 {
            let error = io::Error::last_os_error();
            return if error.kind() == io::ErrorKind::Interrupted {
                Ok(0)
            } else {
                Err(error)
            };
        }

        // SAFETY: the kernel initialized the first `n` entries.
        unsafe { events.set_len(n as usize) };
        Ok(n as usize)
    }
}

/// Non-blocking eventfd used to interrupt a blocked [`EpollPoller::wait`].
pub(crate) struct Wakeup {
    fd: OwnedFd,
}

impl Wakeup {
    pub(crate) fn new() -> Result<Self> {
        let fd = cvt_int(unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) })
            .map_err(|source| Error::os("eventfd", source))?;

        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub(crate) fn wake(&self) {
        let value: u64 = 1;
        let written = unsafe {
            (real().write)(
                self.fd.as_raw_fd(),
                (&value as *const u64).cast(),
                size_of::<u64>(),
            )
        };

        // A saturated counter already guarantees a pending wakeup.
        if written < 0 && !would_block(errno()) {
            tracing::warn!(error = %io::Error::last_os_error(), "failed to signal reactor wakeup");
        }
    }

    /// Resets the counter so the next write produces a new edge.
    pub(crate) fn drain(&self) {
        let mut value: u64 = 0;
        while cvt(unsafe {
            (real().read)(
                self.fd.as_raw_fd(),
                (&mut value as *mut u64).cast(),
                size_of::<u64>(),
            )
        })
        .is_ok()
        {}
    }
}

impl AsRawFd for Wakeup {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
