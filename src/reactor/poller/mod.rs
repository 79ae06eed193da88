//! OS readiness multiplexer (epoll) and its wakeup descriptor.

mod epoll;

pub(crate) use epoll::{EpollPoller, WAKE_TOKEN, Wakeup};
