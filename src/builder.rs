//! Fluent builder for schedulers and reactors.
//!
//! Collects a [`RuntimeConfig`] and turns it into either a plain
//! [`Scheduler`] (task execution only) or a [`Reactor`] (tasks, descriptor
//! readiness and timers).
//!
//! # Example
//! ```ignore
//! use fiber_reactor::RuntimeBuilder;
//! use std::time::Duration;
//!
//! let reactor = RuntimeBuilder::new()
//!     .name("io")
//!     .threads(4)
//!     .max_idle_timeout(Duration::from_millis(500))
//!     .build_reactor()?;
//! ```

use crate::error::Result;
use crate::fiber::DEFAULT_STACK_SIZE;
use crate::reactor::Reactor;
use crate::runtime::Scheduler;

use std::time::Duration;

/// Settings shared by schedulers and reactors.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Thread name prefix; workers are named `<name>_<index>`.
    pub name: String,
    /// Number of spawned worker threads.
    pub threads: usize,
    /// Whether the constructing thread also works while `stop()` drains the queue.
    pub use_caller: bool,
    /// Stack size of every fiber the runtime creates.
    pub stack_size: usize,
    /// Whether workers enable syscall interception.
    pub hook: bool,
    /// Upper bound on a single idle wait.
    pub max_idle_timeout: Duration,
    /// Number of readiness events fetched per multiplexer call.
    pub max_events: usize,
    /// Timeout applied to hooked `connect`; `None` waits forever.
    pub connect_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: String::from("reactor"),
            threads: 1,
            use_caller: false,
            stack_size: DEFAULT_STACK_SIZE,
            hook: true,
            max_idle_timeout: Duration::from_millis(3000),
            max_events: 256,
            connect_timeout: Some(Duration::from_millis(5000)),
        }
    }
}

/// Builder for [`Scheduler`] and [`Reactor`] instances.
///
/// # Example
/// ```ignore
/// let scheduler = RuntimeBuilder::new().threads(2).use_caller(true).build_scheduler();
/// ```
#[derive(Debug, Clone, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Creates a builder holding the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the thread name prefix.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets the number of spawned worker threads.
    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = threads;
        self
    }

    /// Makes the constructing thread a worker as well.
    ///
    /// The caller thread only runs tasks while it is inside `stop()`.
    pub fn use_caller(mut self, use_caller: bool) -> Self {
        self.config.use_caller = use_caller;
        self
    }

    /// Sets the stack size of fibers created by the runtime.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = bytes;
        self
    }

    /// Enables or disables syscall interception on worker threads.
    pub fn hook(mut self, enabled: bool) -> Self {
        self.config.hook = enabled;
        self
    }

    /// Caps how long an idle worker blocks before re-checking for shutdown.
    pub fn max_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.max_idle_timeout = timeout;
        self
    }

    /// Sets how many readiness events a single multiplexer call may return.
    pub fn max_events(mut self, events: usize) -> Self {
        self.config.max_events = events.max(1);
        self
    }

    /// Sets the timeout used by hooked `connect`.
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Returns the configuration collected so far.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Builds a plain scheduler. Its workers are spawned by [`Scheduler::start`].
    pub fn build_scheduler(self) -> Scheduler {
        Scheduler::with_config(self.config)
    }

    /// Builds a reactor and starts its workers.
    ///
    /// # Errors
    /// Fails when the epoll instance or wakeup descriptor cannot be created,
    /// or a worker thread cannot be spawned.
    pub fn build_reactor(self) -> Result<Reactor> {
        Reactor::with_config(self.config)
    }
}
