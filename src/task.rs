//! Units of work accepted by a scheduler.
//!
//! A [`Task`] is either an existing [`Fiber`] to resume or a plain closure
//! that the worker wraps into a fiber of its own, optionally pinned to one
//! OS thread.
//!
//! # Example
//!
//! ```ignore
//! use fiber_reactor::{Fiber, Task};
//!
//! scheduler.submit(Task::func(|| println!("on any worker")));
//!
//! let fiber = Fiber::new(|| println!("resumed by the scheduler"));
//! scheduler.submit(Task::fiber(fiber).pinned(worker_thread_id));
//! ```

use crate::fiber::{Fiber, State};

use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

/// What a task runs.
pub(crate) enum Work {
    Fiber(Arc<Fiber>),
    Func(Box<dyn FnOnce() + Send + 'static>),
}

/// A fiber or closure waiting in a scheduler's queue.
pub struct Task {
    pub(crate) work: Work,
    pin: Option<ThreadId>,
}

impl Task {
    /// Creates a task that resumes `fiber` when claimed.
    pub fn fiber(fiber: Arc<Fiber>) -> Self {
        Self {
            work: Work::Fiber(fiber),
            pin: None,
        }
    }

    /// Creates a task that runs `function` inside a fiber when claimed.
    pub fn func<F>(function: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            work: Work::Func(Box::new(function)),
            pin: None,
        }
    }

    /// Restricts the task to the worker running on `thread`.
    pub fn pinned(mut self, thread: ThreadId) -> Self {
        self.pin = Some(thread);
        self
    }

    /// The thread this task is pinned to, if any.
    pub fn pin(&self) -> Option<ThreadId> {
        self.pin
    }

    /// Returns true when `thread` is allowed to run this task.
    pub(crate) fn runnable_on(&self, thread: ThreadId) -> bool {
        self.pin.is_none_or(|pin| pin == thread)
    }

    /// A fiber that is still switching out on another thread cannot be claimed yet.
    pub(crate) fn is_busy(&self) -> bool {
        matches!(&self.work, Work::Fiber(fiber) if fiber.state() == State::Running)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Task");
        match &self.work {
            Work::Fiber(fiber) => debug.field("fiber", &fiber.id()),
            Work::Func(_) => debug.field("func", &"FnOnce"),
        };

        debug.field("pin", &self.pin).finish()
    }
}

impl From<Arc<Fiber>> for Task {
    fn from(fiber: Arc<Fiber>) -> Self {
        Task::fiber(fiber)
    }
}
