//! Readiness directions and interest masks.

use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Direction a fiber waits on a descriptor for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Read, Direction::Write];
}

/// Set of armed directions on a descriptor.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Interest(u8);

impl Interest {
    pub(crate) const NONE: Interest = Interest(0);
    pub(crate) const READ: Interest = Interest(0b01);
    pub(crate) const WRITE: Interest = Interest(0b10);
    pub(crate) const BOTH: Interest = Interest(0b11);

    pub(crate) fn contains(self, direction: Direction) -> bool {
        !(self & Interest::from(direction)).is_empty()
    }

    pub(crate) fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub(crate) fn without(self, other: Interest) -> Interest {
        Interest(self.0 & !other.0)
    }

    /// Edge-triggered epoll flags for this interest.
    pub(crate) fn epoll_flags(self) -> u32 {
        let mut flags = libc::EPOLLET as u32;
        if self.contains(Direction::Read) {
            flags |= libc::EPOLLIN as u32;
        }
        if self.contains(Direction::Write) {
            flags |= libc::EPOLLOUT as u32;
        }

        flags
    }

    /// Directions reported ready by an epoll event.
    ///
    /// Errors and hang-ups make every direction ready so all waiters observe them.
    pub(crate) fn from_epoll(events: u32) -> Interest {
        if events & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0 {
            return Interest::BOTH;
        }

        let mut interest = Interest::NONE;
        if events & (libc::EPOLLIN | libc::EPOLLRDHUP) as u32 != 0 {
            interest = interest | Interest::READ;
        }
        if events & libc::EPOLLOUT as u32 != 0 {
            interest = interest | Interest::WRITE;
        }

        interest
    }
}

impl From<Direction> for Interest {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Read => Interest::READ,
            Direction::Write => Interest::WRITE,
        }
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOr<Direction> for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Direction) -> Interest {
        self | Interest::from(rhs)
    }
}

impl BitAnd for Interest {
    type Output = Interest;

    fn bitand(self, rhs: Interest) -> Interest {
        Interest(self.0 & rhs.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.contains(Direction::Read), self.contains(Direction::Write)) {
            (true, true) => f.write_str("READ | WRITE"),
            (true, false) => f.write_str("READ"),
            (false, true) => f.write_str("WRITE"),
            (false, false) => f.write_str("NONE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_events_ready_both_directions() {
        let ready = Interest::from_epoll(libc::EPOLLHUP as u32);
        assert!(ready.contains(Direction::Read));
        assert!(ready.contains(Direction::Write));

        let ready = Interest::from_epoll(libc::EPOLLOUT as u32);
        assert_eq!(ready, Interest::WRITE);
    }

    #[test]
    fn test_epoll_flags_are_edge_triggered() {
        let flags = (Interest::NONE | Direction::Read).epoll_flags();

        assert_ne!(flags & libc::EPOLLET as u32, 0, "registrations must be edge-triggered");
        assert_ne!(flags & libc::EPOLLIN as u32, 0);
        assert_eq!(flags & libc::EPOLLOUT as u32, 0);
    }
}
