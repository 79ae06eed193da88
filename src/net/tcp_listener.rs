//! TCP listener for accepting incoming connections.
//!
//! # Usage
//!
//! ```ignore
//! use fiber_reactor::Reactor;
//! use fiber_reactor::net::TcpListener;
//!
//! let reactor = Reactor::new(2)?;
//! reactor.spawn(|| {
//!     let listener = TcpListener::bind("127.0.0.1:8080").unwrap();
//!     loop {
//!         let (stream, peer) = listener.accept().unwrap();
//!         println!("New connection from {peer}");
//!     }
//! });
//! ```
use crate::hook;
use crate::net::tcp_stream::TcpStream;
use crate::net::utils::{local_addr, parse_sockaddr, set_reuse_addr, socketaddr_to_sockaddr};
use crate::utils::cvt_int;

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use tracing::debug;

/// A TCP socket listening for connections.
///
/// [`Self::accept`] looks blocking but, inside a fiber on a hooked reactor
/// worker, only the calling fiber waits for the next connection.
pub struct TcpListener {
    file_descriptor: RawFd,
}

impl TcpListener {
    /// Binds a listener to `address` (`"ip:port"`) with a backlog of 128.
    ///
    /// Port `0` picks an ephemeral port; read it back with [`Self::local_addr`].
    pub fn bind(address: &str) -> io::Result<Self> {
        let address = parse_sockaddr(address)?;
        let domain = match address {
            SocketAddr::V4(_) => libc::AF_INET,
            SocketAddr::V6(_) => libc::AF_INET6,
        };

        let socket = hook::socket(domain, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0)?;
        let listener = Self {
            file_descriptor: socket.into_raw_fd(),
        };

        set_reuse_addr(listener.file_descriptor)?;

        let (storage, len) = socketaddr_to_sockaddr(&address);
        cvt_int(unsafe {
            libc::bind(
                listener.file_descriptor,
                (&storage as *const libc::sockaddr_storage).cast(),
                len,
            )
        })?;
        cvt_int(unsafe { libc::listen(listener.file_descriptor, 128) })?;

        debug!(fd = listener.file_descriptor, %address, "listening");
        Ok(listener)
    }

    /// Waits for the next connection.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (client, peer) = hook::accept(self.file_descriptor)?;
        let stream = TcpStream::from_raw(client.into_raw_fd());

        let peer = match peer {
            Some(peer) => peer,
            None => stream.peer_addr()?,
        };

        Ok((stream, peer))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        local_addr(self.file_descriptor)
    }
}

impl AsRawFd for TcpListener {
    fn as_raw_fd(&self) -> RawFd {
        self.file_descriptor
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        let _ = hook::close(self.file_descriptor);
    }
}
