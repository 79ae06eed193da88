//! State shared by every scheduler flavour.
//!
//! [`Core`] holds what the worker loop needs regardless of how a worker
//! idles: the configuration, the task queue, worker counters, the stop flag
//! and the join handles of spawned threads.

use crate::builder::RuntimeConfig;
use crate::fiber::Fiber;
use crate::runtime::queue::TaskQueue;

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::warn;

pub(crate) struct Core {
    config: RuntimeConfig,
    pub(crate) queue: TaskQueue,
    /// Workers currently running a claimed task.
    pub(crate) active: AtomicUsize,
    /// Workers currently inside their idle fiber.
    pub(crate) idle: AtomicUsize,
    stop_requested: AtomicBool,
    pub(crate) started: AtomicBool,
    pub(crate) stopped: AtomicBool,
    pub(crate) workers: Mutex<Vec<JoinHandle<()>>>,
    /// Thread that built the scheduler when it also works as a worker.
    caller: Option<ThreadId>,
    /// Fiber running the worker loop on the caller thread during `stop()`.
    pub(crate) caller_fiber: Mutex<Option<Arc<Fiber>>>,
}

impl Core {
    pub(crate) fn new(mut config: RuntimeConfig) -> Self {
        if config.threads == 0 && !config.use_caller {
            warn!(name = %config.name, "scheduler without threads or caller; using one worker thread");
            config.threads = 1;
        }

        let caller = config.use_caller.then(|| thread::current().id());

        Self {
            config,
            queue: TaskQueue::new(),
            active: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            stop_requested: AtomicBool::new(false),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            caller,
            caller_fiber: Mutex::new(None),
        }
    }

    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn caller(&self) -> Option<ThreadId> {
        self.caller
    }

    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// True once stop was requested, the queue is empty and no worker runs a task.
    pub(crate) fn stopping(&self) -> bool {
        self.stop_requested() && self.queue.is_quiescent(&self.active)
    }

    pub(crate) fn active_workers(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn idle_workers(&self) -> usize {
        self.idle.load(Ordering::Acquire)
    }
}
