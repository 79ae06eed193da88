//! Event-driven I/O reactor.
//!
//! A [`Reactor`] is a scheduler whose idle workers wait in `epoll_wait`
//! instead of on a condition variable. On top of task execution it offers:
//!
//! - one-shot readiness registrations per descriptor and [`Direction`]
//!   ([`ReactorHandle::add_event`], [`ReactorHandle::del_event`]);
//! - timers ([`ReactorHandle::add_clock`], [`ReactorHandle::add_cond_clock`]).
//!
//! A reactor only agrees to stop once its queue is empty, no clock is armed
//! and no direction is registered, so a parked fiber is never dropped.
//!
//! # Example
//!
//! ```ignore
//! use fiber_reactor::{Direction, Fiber, Reactor};
//!
//! let reactor = Reactor::new(2)?;
//! let handle = reactor.handle();
//!
//! reactor.spawn(move || {
//!     // Park this fiber until `fd` becomes readable.
//!     handle.add_event(fd, Direction::Read).unwrap();
//!     Fiber::yield_now();
//! });
//! ```

mod channel;
mod core;
pub mod event;
mod poller;

pub use event::Direction;

use crate::builder::RuntimeConfig;
use crate::error::Result;
use crate::fiber::Fiber;
use crate::runtime::context;
use crate::runtime::core::Core;
use crate::runtime::driver::{self, Driver};
use crate::task::Task;
use crate::time::Clock;
use self::core::ReactorInner;

use std::fmt;
use std::ops::Deref;
use std::os::fd::RawFd;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Cloneable reference to a running [`Reactor`].
#[derive(Clone)]
pub struct ReactorHandle {
    inner: Arc<ReactorInner>,
}

impl ReactorHandle {
    pub(crate) fn from_inner(inner: Arc<ReactorInner>) -> Self {
        Self { inner }
    }

    /// Returns the reactor the calling thread works for.
    pub fn current() -> Option<Self> {
        context::reactor()
    }

    /// Queues a task.
    pub fn submit(&self, task: Task) {
        driver::submit(&*self.inner, task);
    }

    /// Runs `function` on a fiber of any worker.
    pub fn spawn<F>(&self, function: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Task::func(function));
    }

    /// Runs `function` on a fiber of the worker running on `thread`.
    pub fn spawn_on<F>(&self, function: F, thread: ThreadId)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Task::func(function).pinned(thread));
    }

    /// Queues an existing fiber to be resumed.
    pub fn schedule(&self, fiber: Arc<Fiber>) {
        self.submit(Task::fiber(fiber));
    }

    /// Parks the calling fiber on `fd` until `direction` is ready.
    ///
    /// Only registers interest: the caller yields afterwards with
    /// [`Fiber::yield_now`] and is resumed once the descriptor is ready or
    /// the registration is removed with `trigger_first`.
    ///
    /// # Errors
    /// Fails when epoll rejects the registration or the reactor is stopping.
    ///
    /// # Panics
    /// Arming a direction that is already armed, or calling this outside of
    /// a fiber, is a fatal invariant violation.
    pub fn add_event(&self, fd: RawFd, direction: Direction) -> Result<()> {
        self.inner.add_event(fd, direction, None)
    }

    /// Runs `callback` as a task once `fd` is ready for `direction`.
    pub fn add_event_with<F>(&self, fd: RawFd, direction: Direction, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.add_event(fd, direction, Some(Box::new(callback)))
    }

    /// Disarms `direction` on `fd`.
    ///
    /// With `trigger_first` the registered waiter is submitted before being
    /// dropped. Returns false when the direction was not armed.
    pub fn del_event(&self, fd: RawFd, direction: Direction, trigger_first: bool) -> bool {
        self.inner.del_event(fd, direction, trigger_first)
    }

    pub(crate) fn expire_event<F>(&self, fd: RawFd, direction: Direction, on_expired: F) -> bool
    where
        F: FnOnce(),
    {
        self.inner.expire_event(fd, direction, on_expired)
    }

    /// Disarms both directions of `fd`, triggering their waiters.
    pub fn cancel_all(&self, fd: RawFd) -> bool {
        self.inner.cancel_all(fd)
    }

    /// Number of armed directions across all descriptors.
    pub fn pending_events(&self) -> usize {
        self.inner.pending_events()
    }

    /// Arms a clock whose callback runs as a task on this reactor.
    pub fn add_clock<F>(&self, period: Duration, callback: F, recurring: bool) -> Clock
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.clocks.add_clock(period, callback, recurring)
    }

    /// Arms a clock that does nothing once `guard` has been dropped.
    pub fn add_cond_clock<F, T>(&self, period: Duration, callback: F, guard: Weak<T>, recurring: bool) -> Clock
    where
        F: Fn() + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        self.inner.clocks.add_cond_clock(period, callback, guard, recurring)
    }

    /// Time until the earliest armed clock, `None` when there is none.
    pub fn next_deadline_delta(&self) -> Option<Duration> {
        self.inner.clocks.next_deadline_delta()
    }

    pub fn name(&self) -> &str {
        self.inner.core().name()
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.inner.core().config()
    }

    pub fn active_workers(&self) -> usize {
        self.inner.core().active_workers()
    }

    pub fn idle_workers(&self) -> usize {
        self.inner.core().idle_workers()
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner.core().queue.len()
    }

    /// True once shutdown was requested and all work, clocks and events have drained.
    pub fn is_stopping(&self) -> bool {
        self.inner.stopping()
    }

    pub(crate) fn core(&self) -> &Core {
        self.inner.core()
    }
}

impl fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("name", &self.name())
            .field("pending_events", &self.pending_events())
            .field("clocks", &self.inner.clocks.len())
            .finish()
    }
}

/// Owner of a reactor. Workers start on construction.
///
/// Dropping the owner stops the reactor, waiting until every queued task,
/// armed clock and registered event has been consumed.
pub struct Reactor {
    handle: ReactorHandle,
}

impl Reactor {
    /// Creates and starts a reactor with `threads` workers and default settings.
    ///
    /// # Errors
    /// Fails when the epoll instance or wakeup descriptor cannot be created,
    /// or a worker thread cannot be spawned.
    pub fn new(threads: usize) -> Result<Self> {
        Self::with_config(RuntimeConfig {
            threads,
            ..RuntimeConfig::default()
        })
    }

    pub(crate) fn with_config(config: RuntimeConfig) -> Result<Self> {
        let inner = Arc::new(ReactorInner::new(config)?);
        driver::attach_caller(&inner);

        let reactor = Self {
            handle: ReactorHandle { inner },
        };
        driver::start(&reactor.handle.inner)?;

        Ok(reactor)
    }

    /// Stops the reactor once all work has drained.
    ///
    /// # Panics
    /// Must be called from the thread that built the reactor when
    /// `use_caller` is set, and never from one of its own workers.
    pub fn stop(&self) {
        driver::stop(&self.handle.inner);
    }

    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Returns the reactor the calling thread works for.
    pub fn current() -> Option<ReactorHandle> {
        context::reactor()
    }
}

impl Deref for Reactor {
    type Target = ReactorHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        if !thread::panicking() {
            self.stop();
        }
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reactor").field(&self.handle).finish()
    }
}
