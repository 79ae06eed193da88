use crate::hook;
use crate::hook::socket::default_connect_timeout;
use crate::net::utils::{local_addr, parse_sockaddr, peer_addr, set_timeout};
use crate::utils::cvt_int;

use libc::{SO_RCVTIMEO, SO_SNDTIMEO};
use std::io::{self, IoSlice, IoSliceMut, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use std::time::Duration;
use tracing::debug;

/// A connected TCP socket whose reads and writes go through the hook layer.
///
/// Inside a fiber on a hooked reactor worker a read with no data (or a write
/// with a full send buffer) suspends only the calling fiber. Socket timeouts
/// set with [`Self::set_read_timeout`] / [`Self::set_write_timeout`] bound
/// that wait and surface as [`io::ErrorKind::TimedOut`].
pub struct TcpStream {
    file_descriptor: RawFd,
}

impl TcpStream {
    pub(crate) fn from_raw(file_descriptor: RawFd) -> Self {
        Self { file_descriptor }
    }

    /// Connects to `address`, bounded by the current reactor's configured
    /// connect timeout (no bound outside a reactor).
    pub fn connect(address: &str) -> io::Result<Self> {
        Self::connect_inner(address, default_connect_timeout())
    }

    pub fn connect_timeout(address: &str, timeout: Duration) -> io::Result<Self> {
        Self::connect_inner(address, Some(timeout))
    }

    fn connect_inner(address: &str, timeout: Option<Duration>) -> io::Result<Self> {
        let address = parse_sockaddr(address)?;
        let domain = match address {
            SocketAddr::V4(_) => libc::AF_INET,
            SocketAddr::V6(_) => libc::AF_INET6,
        };

        let socket = hook::socket(domain, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0)?;
        let stream = Self::from_raw(socket.into_raw_fd());

        hook::connect(stream.file_descriptor, &address, timeout)?;

        debug!(fd = stream.file_descriptor, %address, "connected");
        Ok(stream)
    }

    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        hook::read(self.file_descriptor, buf)
    }

    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        hook::write(self.file_descriptor, buf)
    }

    pub fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write returned zero bytes",
                ));
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Bounds how long a read may wait; `None` waits indefinitely.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        set_timeout(self.file_descriptor, SO_RCVTIMEO, timeout)
    }

    /// Bounds how long a write may wait; `None` waits indefinitely.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        set_timeout(self.file_descriptor, SO_SNDTIMEO, timeout)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        hook::socket_timeout(self.file_descriptor, SO_RCVTIMEO)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        hook::socket_timeout(self.file_descriptor, SO_SNDTIMEO)
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        hook::set_nonblocking(self.file_descriptor, nonblocking)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        peer_addr(self.file_descriptor)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        local_addr(self.file_descriptor)
    }

    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        let how = match how {
            Shutdown::Read => libc::SHUT_RD,
            Shutdown::Write => libc::SHUT_WR,
            Shutdown::Both => libc::SHUT_RDWR,
        };

        cvt_int(unsafe { libc::shutdown(self.file_descriptor, how) }).map(drop)
    }
}

impl Read for &TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        hook::read(self.file_descriptor, buf)
    }

    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        hook::readv(self.file_descriptor, bufs)
    }
}

impl Write for &TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        hook::write(self.file_descriptor, buf)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        hook::writev(self.file_descriptor, bufs)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        hook::read(self.file_descriptor, buf)
    }

    fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        hook::readv(self.file_descriptor, bufs)
    }
}

impl Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        hook::write(self.file_descriptor, buf)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        hook::writev(self.file_descriptor, bufs)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsRawFd for TcpStream {
    fn as_raw_fd(&self) -> RawFd {
        self.file_descriptor
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        let _ = hook::close(self.file_descriptor);
    }
}
