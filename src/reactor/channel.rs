//! Per-descriptor event bookkeeping.
//!
//! A [`Channel`] records which directions of a descriptor are armed and who
//! to wake for each of them. A direction holds at most one [`Waiter`];
//! arming it twice without disarming in between is a fatal error.

use crate::fiber::Fiber;
use crate::reactor::event::{Direction, Interest};
use crate::runtime::Handle;
use crate::task::Task;
use crate::utils::invariant;

use parking_lot::Mutex;
use std::os::fd::RawFd;
use std::sync::Arc;

/// What to run when a direction becomes ready.
pub(crate) enum Callback {
    /// Resume a fiber parked on the descriptor.
    Fiber(Arc<Fiber>),
    /// Run a closure as a new task.
    Func(Box<dyn FnOnce() + Send + 'static>),
}

/// A registered callback and the scheduler it is delivered to.
pub(crate) struct Waiter {
    pub(crate) owner: Handle,
    pub(crate) callback: Callback,
}

impl Waiter {
    /// Hands the callback to its owning scheduler as a task.
    pub(crate) fn dispatch(self) {
        let task = match self.callback {
            Callback::Fiber(fiber) => Task::fiber(fiber),
            Callback::Func(function) => Task::func(function),
        };

        self.owner.submit(task);
    }
}

#[derive(Default)]
pub(crate) struct Slots {
    interest: Interest,
    read: Option<Waiter>,
    write: Option<Waiter>,
}

impl Slots {
    pub(crate) fn interest(&self) -> Interest {
        self.interest
    }

    fn slot(&mut self, direction: Direction) -> &mut Option<Waiter> {
        match direction {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }

    /// Stores `waiter` for an unarmed direction.
    pub(crate) fn arm(&mut self, fd: RawFd, direction: Direction, waiter: Waiter) {
        invariant!(
            !self.interest.contains(direction),
            "fd {fd} already has a {direction:?} waiter armed"
        );

        self.interest = self.interest | direction;
        *self.slot(direction) = Some(waiter);
    }

    /// Clears a direction and returns its waiter.
    pub(crate) fn disarm(&mut self, direction: Direction) -> Option<Waiter> {
        if !self.interest.contains(direction) {
            return None;
        }

        self.interest = self.interest.without(direction.into());
        self.slot(direction).take()
    }

    /// Clears every direction in `ready` that is armed and returns their waiters.
    pub(crate) fn take_ready(&mut self, ready: Interest) -> Vec<Waiter> {
        Direction::ALL
            .into_iter()
            .filter(|direction| ready.contains(*direction))
            .filter_map(|direction| self.disarm(direction))
            .collect()
    }
}

pub(crate) struct Channel {
    fd: RawFd,
    pub(crate) slots: Mutex<Slots>,
}

impl Channel {
    pub(crate) fn new(fd: RawFd) -> Self {
        Self {
            fd,
            slots: Mutex::new(Slots::default()),
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Scheduler;

    fn waiter(scheduler: &Scheduler) -> Waiter {
        Waiter {
            owner: Handle::Scheduler(scheduler.handle()),
            callback: Callback::Func(Box::new(|| {})),
        }
    }

    #[test]
    fn test_disarm_returns_waiter_once() {
        let scheduler = Scheduler::new(1);
        let mut slots = Slots::default();

        slots.arm(3, Direction::Read, waiter(&scheduler));
        assert_eq!(slots.interest(), Interest::READ);

        assert!(slots.disarm(Direction::Read).is_some());
        assert!(slots.disarm(Direction::Read).is_none(), "second disarm is a no-op");
        assert!(slots.interest().is_empty());
    }

    #[test]
    fn test_take_ready_only_returns_armed_directions() {
        let scheduler = Scheduler::new(1);
        let mut slots = Slots::default();

        slots.arm(3, Direction::Write, waiter(&scheduler));

        let ready = slots.take_ready(Interest::BOTH);
        assert_eq!(ready.len(), 1);
        assert!(slots.interest().is_empty());
    }

    #[test]
    #[should_panic(expected = "already has a Read waiter armed")]
    fn test_double_arm_is_fatal() {
        let scheduler = Scheduler::new(1);
        let mut slots = Slots::default();

        slots.arm(3, Direction::Read, waiter(&scheduler));
        slots.arm(3, Direction::Read, waiter(&scheduler));
    }
}
