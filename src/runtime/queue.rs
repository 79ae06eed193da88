//! Shared task queue of a scheduler.
//!
//! Claims scan the queue in submission order for the first task the calling
//! worker may run. Tasks pinned to other threads, and fibers still switching
//! out on another worker, are left in place.

use crate::task::Task;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::ThreadId;

/// Outcome of [`TaskQueue::claim`].
pub(crate) struct Claim {
    /// The task taken by the caller, if one was runnable.
    pub(crate) task: Option<Task>,
    /// Tasks remain queued; other workers should be woken to look at them.
    pub(crate) tickle: bool,
}

pub(crate) struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a task.
    pub(crate) fn push(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }

    /// Takes the first task runnable on `thread`.
    ///
    /// `active` is incremented under the queue lock when a task is taken, so
    /// [`is_quiescent`](Self::is_quiescent) never sees an empty queue while
    /// the claimed task has not been counted yet.
    pub(crate) fn claim(&self, thread: ThreadId, active: &AtomicUsize) -> Claim {
        let mut tasks = self.tasks.lock();

        let index = tasks
            .iter()
            .position(|task| task.runnable_on(thread) && !task.is_busy());
        let task = index.and_then(|index| tasks.remove(index));

        if task.is_some() {
            active.fetch_add(1, Ordering::AcqRel);
        }

        Claim {
            task,
            tickle: !tasks.is_empty(),
        }
    }

    /// Returns true when nothing is queued and no claimed task is still running.
    pub(crate) fn is_quiescent(&self, active: &AtomicUsize) -> bool {
        let tasks = self.tasks.lock();

        tasks.is_empty() && active.load(Ordering::Acquire) == 0
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::Fiber;

    use std::thread;

    fn other_thread() -> ThreadId {
        thread::spawn(|| thread::current().id()).join().unwrap()
    }

    #[test]
    fn test_claim_takes_tasks_in_order() {
        let queue = TaskQueue::new();
        let active = AtomicUsize::new(0);
        let me = thread::current().id();

        queue.push(Task::func(|| {}));
        queue.push(Task::func(|| {}));

        let first = queue.claim(me, &active);
        assert!(first.task.is_some(), "first task must be claimed");
        assert!(first.tickle, "a second task is still queued");
        assert_eq!(active.load(Ordering::Acquire), 1);

        let second = queue.claim(me, &active);
        assert!(second.task.is_some());
        assert!(!second.tickle, "queue is drained");
        assert_eq!(active.load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_claim_skips_tasks_pinned_elsewhere() {
        let queue = TaskQueue::new();
        let active = AtomicUsize::new(0);
        let me = thread::current().id();

        queue.push(Task::func(|| {}).pinned(other_thread()));

        let claim = queue.claim(me, &active);
        assert!(claim.task.is_none(), "pinned task must not be claimed by another thread");
        assert!(claim.tickle, "the pinned task's owner must be woken");
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_quiescent(&active));

        queue.push(Task::func(|| {}).pinned(me));
        let claim = queue.claim(me, &active);
        assert_eq!(claim.task.and_then(|task| task.pin()), Some(me));
    }

    #[test]
    fn test_claim_skips_running_fiber() {
        let queue = TaskQueue::new();
        let active = AtomicUsize::new(0);

        // The thread's main fiber is always running.
        queue.push(Task::fiber(Fiber::current()));

        let claim = queue.claim(thread::current().id(), &active);
        assert!(claim.task.is_none(), "a running fiber cannot be claimed");
        assert!(claim.tickle);
        assert_eq!(active.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_quiescent_requires_no_active_task() {
        let queue = TaskQueue::new();
        let active = AtomicUsize::new(0);

        assert!(queue.is_quiescent(&active));

        queue.push(Task::func(|| {}));
        let _claim = queue.claim(thread::current().id(), &active);
        assert!(!queue.is_quiescent(&active), "claimed task is still running");

        active.fetch_sub(1, Ordering::AcqRel);
        assert!(queue.is_quiescent(&active));
    }
}
