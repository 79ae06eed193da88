//! TCP networking over the hook layer.
//!
//! - [`tcp_listener`]: [`TcpListener`] for accepting connections
//! - [`tcp_stream`]: [`TcpStream`] for reading/writing data
//! - [`utils`]: Address parsing and conversion utilities
//!
//! Both types are plain blocking-style sockets. Used from fibers on a reactor
//! they suspend only the calling fiber while waiting.
//!
//! # Example
//!
//! ```ignore
//! use fiber_reactor::Reactor;
//! use fiber_reactor::net::{TcpListener, TcpStream};
//!
//! let reactor = Reactor::new(2)?;
//! reactor.spawn(|| {
//!     let listener = TcpListener::bind("127.0.0.1:8080").unwrap();
//!     let (stream, _) = listener.accept().unwrap();
//!     let mut buf = [0u8; 64];
//!     let n = stream.read(&mut buf).unwrap();
//!     stream.write_all(&buf[..n]).unwrap();
//! });
//! reactor.spawn(|| {
//!     let stream = TcpStream::connect("127.0.0.1:8080").unwrap();
//!     stream.write_all(b"ping").unwrap();
//! });
//! ```

pub mod tcp_listener;
pub mod tcp_stream;
pub mod utils;

pub use tcp_listener::TcpListener;
pub use tcp_stream::TcpStream;
