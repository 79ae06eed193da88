use crate::reactor::ReactorHandle;
use crate::runtime::context;
use crate::runtime::core::Core;
use crate::runtime::scheduler::SchedulerHandle;
use crate::task::Task;

/// Reference to whichever scheduler flavour a thread works for.
#[derive(Clone, Debug)]
pub enum Handle {
    Scheduler(SchedulerHandle),
    Reactor(ReactorHandle),
}

impl Handle {
    /// Returns the scheduler or reactor the calling thread works for.
    ///
    /// Set on worker threads and on the thread that built a `use_caller` runtime.
    pub fn current() -> Option<Self> {
        context::handle()
    }

    pub fn submit(&self, task: Task) {
        match self {
            Handle::Scheduler(scheduler) => scheduler.submit(task),
            Handle::Reactor(reactor) => reactor.submit(task),
        }
    }

    pub fn spawn<F>(&self, function: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Task::func(function));
    }

    pub fn name(&self) -> &str {
        self.core().name()
    }

    /// Returns the reactor if this handle refers to one.
    pub fn as_reactor(&self) -> Option<&ReactorHandle> {
        match self {
            Handle::Reactor(reactor) => Some(reactor),
            Handle::Scheduler(_) => None,
        }
    }

    pub(crate) fn core(&self) -> &Core {
        match self {
            Handle::Scheduler(scheduler) => scheduler.core(),
            Handle::Reactor(reactor) => reactor.core(),
        }
    }
}
