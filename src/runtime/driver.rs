//! The worker loop shared by schedulers and reactors.
//!
//! A [`Driver`] supplies the parts that differ between a plain scheduler and
//! a reactor: how a sleeping worker is woken ([`Driver::tickle`]), what an
//! idle worker does ([`Driver::idle`]) and when shutdown is permitted
//! ([`Driver::stopping`]). Everything else (claiming tasks, running them on
//! fibers, spawning and joining threads) lives in the free functions below.
//!
//! # Worker loop
//!
//! 1. claim the first task runnable on this thread, tickling peers if tasks remain;
//! 2. resume a fiber task, or run a closure task on a (recycled) fiber;
//! 3. with nothing to claim, resume the per-thread idle fiber;
//! 4. once the idle fiber terminates, the worker exits.

use crate::error::{Error, Result};
use crate::fiber::{Fiber, State};
use crate::runtime::Handle;
use crate::runtime::context;
use crate::runtime::core::Core;
use crate::task::{Task, Work};
use crate::utils::invariant;

use std::mem;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use tracing::{debug, error, trace};

pub(crate) trait Driver: Send + Sync + 'static {
    fn core(&self) -> &Core;

    /// Wraps this driver into the handle installed in worker thread contexts.
    fn handle(self: &Arc<Self>) -> Handle;

    /// Wakes workers blocked in [`idle`](Driver::idle).
    fn tickle(&self);

    /// Body of a worker's idle fiber.
    ///
    /// Waits for work, yields back to the worker loop after each wait and
    /// returns once [`stopping`](Driver::stopping) holds.
    fn idle(&self);

    fn stopping(&self) -> bool {
        self.core().stopping()
    }
}

/// Prepares the constructing thread as an extra worker for `use_caller` drivers.
///
/// The caller fiber created here runs the worker loop when `stop()` resumes it.
pub(crate) fn attach_caller<D: Driver>(driver: &Arc<D>) {
    let core = driver.core();
    if !core.config().use_caller {
        return;
    }

    context::main_fiber();
    let previous = context::set_handle(Some(driver.handle()));
    invariant!(
        previous.is_none(),
        "thread already works for another scheduler; cannot use it as caller of {}",
        core.name()
    );

    let weak = Arc::downgrade(driver);
    let fiber = Fiber::with_options(
        move || {
            if let Some(driver) = weak.upgrade() {
                run(&driver);
            }
        },
        core.config().stack_size,
        false,
    );

    context::set_scheduler_fiber(Arc::as_ptr(&fiber));
    *core.caller_fiber.lock() = Some(fiber);

    debug!(scheduler = %core.name(), "caller thread attached");
}

/// Spawns the configured worker threads. Calling it again is a no-op.
pub(crate) fn start<D: Driver>(driver: &Arc<D>) -> Result<()> {
    let core = driver.core();
    if core.started.swap(true, Ordering::AcqRel) {
        return Ok(());
    }

    let mut workers = core.workers.lock();
    for index in 0..core.config().threads {
        let worker = Arc::clone(driver);
        let handle = thread::Builder::new()
            .name(format!("{}_{index}", core.name()))
            .spawn(move || run(&worker))
            .map_err(|source| Error::os("thread spawn", source))?;

        workers.push(handle);
    }

    debug!(scheduler = %core.name(), threads = workers.len(), "scheduler started");

    Ok(())
}

/// Requests shutdown, lets the caller thread drain the queue if configured,
/// and joins every worker thread.
///
/// Returns once all queued work has run. Calling it again is a no-op.
pub(crate) fn stop<D: Driver>(driver: &Arc<D>) {
    let core = driver.core();
    if core.stopped.load(Ordering::Acquire) {
        return;
    }

    match core.caller() {
        Some(caller) => invariant!(
            thread::current().id() == caller,
            "scheduler {} must be stopped from the thread that built it",
            core.name()
        ),
        None => invariant!(
            !context::handle().is_some_and(|handle| ptr::eq(handle.core(), core)),
            "scheduler {} cannot be stopped from one of its own workers",
            core.name()
        ),
    }

    debug!(scheduler = %core.name(), "stopping");
    core.request_stop();
    for _ in 0..core.config().threads {
        driver.tickle();
    }

    let caller_fiber = core.caller_fiber.lock().take();
    if let Some(fiber) = caller_fiber {
        driver.tickle();
        fiber.resume();
        context::set_scheduler_fiber(ptr::null());
        context::set_handle(None);
    }

    let workers = mem::take(&mut *core.workers.lock());
    for worker in workers {
        if worker.join().is_err() {
            error!(scheduler = %core.name(), "worker thread panicked");
        }
    }

    core.stopped.store(true, Ordering::Release);
    debug!(scheduler = %core.name(), "stopped");
}

/// Queues a task and wakes a worker to claim it.
pub(crate) fn submit<D: Driver + ?Sized>(driver: &D, task: Task) {
    trace!(scheduler = %driver.core().name(), ?task, "task submitted");

    driver.core().queue.push(task);
    driver.tickle();
}

/// Worker loop; runs on spawned threads and inside the caller fiber.
pub(crate) fn run<D: Driver>(driver: &Arc<D>) {
    let core = driver.core();
    let thread = thread::current().id();
    let stack_size = core.config().stack_size;

    context::main_fiber();
    let previous = context::set_handle(Some(driver.handle()));
    let was_hooked = context::set_hooked(core.config().hook);
    debug!(scheduler = %core.name(), ?thread, "worker started");

    let idle = {
        let driver = Arc::clone(driver);
        Fiber::with_options(
            move || {
                driver.idle();
                // Peers may still be blocked waiting for work that will never come.
                driver.tickle();
            },
            stack_size,
            true,
        )
    };

    // Terminated closure fiber kept around so its stack can be reused.
    let mut spare: Option<Arc<Fiber>> = None;

    loop {
        let claim = core.queue.claim(thread, &core.active);
        if claim.tickle {
            driver.tickle();
        }

        if let Some(task) = claim.task {
            match task.work {
                Work::Fiber(fiber) => {
                    if fiber.state() == State::Ready {
                        trace!(fiber = fiber.id(), "resuming fiber task");
                        fiber.resume();
                    }
                }
                Work::Func(function) => {
                    let fiber = match spare.take() {
                        Some(fiber) => {
                            fiber.reset(function);
                            fiber
                        }
                        None => Fiber::with_options(function, stack_size, true),
                    };

                    trace!(fiber = fiber.id(), "running closure task");
                    fiber.resume();

                    if fiber.state() == State::Term {
                        spare = Some(fiber);
                    }
                }
            }

            core.active.fetch_sub(1, Ordering::AcqRel);
            continue;
        }

        if idle.state() == State::Term {
            break;
        }

        core.idle.fetch_add(1, Ordering::AcqRel);
        idle.resume();
        core.idle.fetch_sub(1, Ordering::AcqRel);
    }

    debug!(scheduler = %core.name(), ?thread, "worker exiting");
    context::set_hooked(was_hooked);
    context::set_handle(previous);
}
