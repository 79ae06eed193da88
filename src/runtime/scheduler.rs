//! Plain N-thread fiber scheduler.
//!
//! Runs tasks on a pool of worker threads. Idle workers park on a condition
//! variable until new work is submitted or shutdown is requested. For
//! descriptor readiness and timers use a [`Reactor`](crate::Reactor) instead.
//!
//! # Example
//! ```ignore
//! use fiber_reactor::RuntimeBuilder;
//!
//! let scheduler = RuntimeBuilder::new().threads(4).build_scheduler();
//! scheduler.start()?;
//!
//! for i in 0..10 {
//!     scheduler.spawn(move || println!("task {i}"));
//! }
//!
//! // Blocks until every queued task has run.
//! scheduler.stop();
//! ```

use crate::builder::RuntimeConfig;
use crate::error::Result;
use crate::fiber::Fiber;
use crate::runtime::Handle;
use crate::runtime::context;
use crate::runtime::core::Core;
use crate::runtime::driver::{self, Driver};
use crate::task::Task;

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Wakeup token shared by the parked workers of a scheduler.
struct Parker {
    notified: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    fn new() -> Self {
        Self {
            notified: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until unparked or `timeout` elapses. A pending token returns immediately.
    fn park(&self, timeout: Duration) {
        let mut notified = self.notified.lock();
        if !*notified {
            self.condvar.wait_for(&mut notified, timeout);
        }

        *notified = false;
    }

    fn unpark(&self) {
        *self.notified.lock() = true;
        self.condvar.notify_all();
    }
}

pub(crate) struct SchedulerInner {
    core: Core,
    parker: Parker,
}

impl Driver for SchedulerInner {
    fn core(&self) -> &Core {
        &self.core
    }

    fn handle(self: &Arc<Self>) -> Handle {
        Handle::Scheduler(SchedulerHandle {
            inner: Arc::clone(self),
        })
    }

    fn tickle(&self) {
        self.parker.unpark();
    }

    fn idle(&self) {
        while !self.stopping() {
            self.parker.park(self.core.config().max_idle_timeout);
            Fiber::yield_now();
        }
    }
}

/// Cloneable reference to a running [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<SchedulerInner>,
}

impl SchedulerHandle {
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

    pub fn name(&self) -> &str {
        self.inner.core.name()
    }

    /// Number of workers currently running a task.
    pub fn active_workers(&self) -> usize {
        self.inner.core.active_workers()
    }

    /// Number of workers currently waiting for work.
    pub fn idle_workers(&self) -> usize {
        self.inner.core.idle_workers()
    }

    /// Number of queued tasks not yet claimed.
    pub fn pending_tasks(&self) -> usize {
        self.inner.core.queue.len()
    }

    /// True once shutdown was requested and all work has drained.
    pub fn is_stopping(&self) -> bool {
        self.inner.stopping()
    }

    pub(crate) fn core(&self) -> &Core {
        &self.inner.core
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("name", &self.name())
            .field("active", &self.active_workers())
            .field("idle", &self.idle_workers())
            .finish()
    }
}

/// Owner of a plain fiber scheduler.
///
/// Dropping the owner stops the scheduler, which waits for all queued work.
/// Clone a [`SchedulerHandle`] (via [`Scheduler::handle`]) to submit work
/// from other threads or from inside tasks.
pub struct Scheduler {
    handle: SchedulerHandle,
}

impl Scheduler {
    /// Creates a scheduler with `threads` workers and default settings.
    pub fn new(threads: usize) -> Self {
        Self::with_config(RuntimeConfig {
            threads,
            ..RuntimeConfig::default()
        })
    }

    pub(crate) fn with_config(config: RuntimeConfig) -> Self {
        let inner = Arc::new(SchedulerInner {
            core: Core::new(config),
            parker: Parker::new(),
        });
        driver::attach_caller(&inner);

        Self {
            handle: SchedulerHandle { inner },
        }
    }

    /// Spawns the worker threads.
    ///
    /// # Errors
    /// Fails when a worker thread cannot be spawned.
    pub fn start(&self) -> Result<()> {
        driver::start(&self.handle.inner)
    }

    /// Stops the scheduler once every queued task has run.
    ///
    /// With `use_caller`, the calling thread works through the queue before
    /// the spawned workers are joined.
    ///
    /// # Panics
    /// Must be called from the thread that built the scheduler when
    /// `use_caller` is set, and never from one of its own workers.
    pub fn stop(&self) {
        driver::stop(&self.handle.inner);
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Returns the scheduler or reactor the calling thread works for.
    pub fn current() -> Option<Handle> {
        context::handle()
    }
}

impl Deref for Scheduler {
    type Target = SchedulerHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !thread::panicking() {
            self.stop();
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Scheduler").field(&self.handle).finish()
    }
}
