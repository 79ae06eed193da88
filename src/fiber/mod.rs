//! Stackful, cooperatively scheduled coroutines.
//!
//! A [`Fiber`] owns a heap allocated stack and a saved `ucontext_t`. Switching
//! between fibers is explicit: [`Fiber::resume`] jumps onto the fiber's stack
//! and [`Fiber::yield_now`] jumps back to the fiber that is responsible for
//! it on the current thread.
//!
//! # Return targets
//!
//! Every OS thread owns one *main fiber* that stands for the thread's
//! original stack. It is created lazily the first time the thread touches the
//! fiber machinery, never owns a stack and is always `Running`.
//!
//! - fibers created with `run_in_scheduler = true` (the default) yield back to
//!   the thread's scheduling fiber, which is the main fiber on worker threads
//!   and the dedicated caller fiber on a scheduler's constructing thread;
//! - fibers created with `run_in_scheduler = false` always hand control
//!   straight back to the thread's main fiber.
//!
//! # Example
//!
//! ```ignore
//! use fiber_reactor::{Fiber, State};
//!
//! let fiber = Fiber::new(|| {
//!     println!("first half");
//!     Fiber::yield_now();
//!     println!("second half");
//! });
//!
//! fiber.resume();
//! assert_eq!(fiber.state(), State::Ready);
//! fiber.resume();
//! assert_eq!(fiber.state(), State::Term);
//! ```

mod stack;

use crate::runtime::context;
use crate::utils::{fatal, invariant};
use stack::Stack;

use std::any::Any;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

use tracing::{error, trace};

/// Stack size used by [`Fiber::new`].
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(0);
static LIVE_FIBERS: AtomicUsize = AtomicUsize::new(0);

/// Execution state of a fiber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    /// Created or suspended; may be resumed.
    Ready = 0,
    /// Currently executing on some thread.
    Running = 1,
    /// The body returned; the fiber can only be reset or dropped.
    Term = 2,
}

impl State {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => State::Ready,
            1 => State::Running,
            _ => State::Term,
        }
    }
}

type Entry = Box<dyn FnOnce() + Send + 'static>;

/// A stackful coroutine.
///
/// Fibers are always handled through `Arc<Fiber>`: the scheduler keeps a
/// strong reference while a task naming the fiber is queued, and the reactor
/// keeps one while the fiber is parked on a descriptor. The thread-local
/// "current fiber" slot is a non-owning pointer.
pub struct Fiber {
    id: u64,
    state: AtomicU8,
    context: UnsafeCell<libc::ucontext_t>,
    stack: Option<Stack>,
    entry: UnsafeCell<Option<Entry>>,
    run_in_scheduler: bool,
}

// A fiber runs on at most one thread at a time. The context and entry cells
// are only touched by the thread that resumes the fiber or by the fiber
// itself, and the atomic state hands them over between threads.
unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

impl Fiber {
    /// Creates a fiber with the default stack that yields back to the scheduler.
    ///
    /// # Arguments
    /// * `function` - The body to run when the fiber is first resumed
    ///
    /// # Returns
    /// A `Ready` fiber
    pub fn new<F>(function: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::with_options(function, DEFAULT_STACK_SIZE, true)
    }

    /// Creates a fiber with an explicit stack size and return target.
    ///
    /// # Arguments
    /// * `function` - The body to run when the fiber is first resumed
    /// * `stack_size` - Stack size in bytes (rounded up to a small minimum)
    /// * `run_in_scheduler` - Whether the fiber yields to the thread's
    ///   scheduling fiber (`true`) or straight to the main fiber (`false`)
    pub fn with_options<F>(function: F, stack_size: usize, run_in_scheduler: bool) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        // The first fiber created on a thread turns the thread itself into its main fiber.
        context::main_fiber();

        let fiber = Arc::new(Fiber {
            id: NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(State::Ready as u8),
            context: UnsafeCell::new(unsafe { mem::zeroed() }),
            stack: Some(Stack::new(stack_size)),
            entry: UnsafeCell::new(Some(Box::new(function))),
            run_in_scheduler,
        });
        LIVE_FIBERS.fetch_add(1, Ordering::Relaxed);

        fiber.prepare_context();
        trace!(fiber = fiber.id, stack_size, "fiber created");

        fiber
    }

    /// Builds the main fiber of the calling thread.
    pub(crate) fn new_main() -> Arc<Self> {
        LIVE_FIBERS.fetch_add(1, Ordering::Relaxed);

        Arc::new(Fiber {
            id: NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(State::Running as u8),
            context: UnsafeCell::new(unsafe { mem::zeroed() }),
            stack: None,
            entry: UnsafeCell::new(None),
            run_in_scheduler: false,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> State {
        State::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Returns true for a thread's main fiber.
    pub fn is_main(&self) -> bool {
        self.stack.is_none()
    }

    pub fn runs_in_scheduler(&self) -> bool {
        self.run_in_scheduler
    }

    /// Start of the stack allocation, `None` for a main fiber.
    pub fn stack_base(&self) -> Option<NonNull<u8>> {
        self.stack.as_ref().map(Stack::base)
    }

    pub fn stack_size(&self) -> usize {
        self.stack.as_ref().map_or(0, Stack::len)
    }

    /// Switches the calling thread onto this fiber's stack.
    ///
    /// Returns once the fiber yields or terminates. Must be called from the
    /// fiber this one yields back to: the scheduling fiber of the thread for
    /// scheduler fibers, the main fiber otherwise.
    ///
    /// # Panics
    /// Resuming a fiber that is not `Ready`, a main fiber, or resuming from the
    /// wrong fiber is a fatal invariant violation.
    pub fn resume(&self) {
        invariant!(
            !self.is_main(),
            "fiber {} is a thread main fiber and cannot be resumed",
            self.id
        );

        let from = self.return_target();
        invariant!(
            ptr::eq(from, context::current_ptr()),
            "fiber {} must be resumed from the fiber it yields back to",
            self.id
        );

        if let Err(actual) = self.state.compare_exchange(
            State::Ready as u8,
            State::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            fatal(format_args!(
                "resume() on fiber {} in state {:?}",
                self.id,
                State::from_raw(actual)
            ));
        }

        trace!(fiber = self.id, "resume");
        context::set_current(self);

        let rc = unsafe { libc::swapcontext((*from).context.get(), self.context.get()) };
        invariant!(rc == 0, "swapcontext failed while resuming fiber {}", self.id);

        // Back on `from`: the fiber's context is fully saved, so only now may
        // another thread pick it up again.
        context::set_current(from);
        let _ = self.state.compare_exchange(
            State::Running as u8,
            State::Ready as u8,
            Ordering::Release,
            Ordering::Relaxed,
        );
    }

    /// Suspends the calling fiber and switches back to its return target.
    ///
    /// The fiber stays `Running` until the switch has completed, then becomes
    /// `Ready`. Whoever wants it to continue must resume it again, usually by
    /// submitting it to a scheduler.
    ///
    /// # Panics
    /// Calling this outside of a fiber (on a thread's main fiber) is a fatal
    /// invariant violation.
    pub fn yield_now() {
        let current = context::current_ptr();
        invariant!(!current.is_null(), "yield_now() called before any fiber exists");

        unsafe { (*current).suspend() };
    }

    /// Reuses the stack of a terminated fiber for a new body.
    ///
    /// # Panics
    /// Resetting a fiber that is not `Term`, or a main fiber, is a fatal
    /// invariant violation.
    pub fn reset<F>(&self, function: F)
    where
        F: FnOnce() + Send + 'static,
    {
        invariant!(!self.is_main(), "the main fiber of a thread cannot be reset");

        let state = self.state();
        invariant!(
            state == State::Term,
            "reset() on fiber {} in state {state:?}",
            self.id
        );

        unsafe { *self.entry.get() = Some(Box::new(function)) };
        self.prepare_context();
        self.state.store(State::Ready as u8, Ordering::Release);
    }

    /// Returns the fiber running on the calling thread.
    ///
    /// On a thread that never ran a fiber this creates and returns its main fiber.
    pub fn current() -> Arc<Fiber> {
        context::main_fiber();
        let current = context::current_ptr();

        // SAFETY: the current slot only ever holds pointers obtained from a live
        // `Arc<Fiber>`, and whoever resumed that fiber keeps a strong reference
        // for as long as it runs.
        unsafe {
            Arc::increment_strong_count(current);
            Arc::from_raw(current)
        }
    }

    /// Id of the fiber running on the calling thread.
    pub fn current_id() -> u64 {
        context::main_fiber();

        unsafe { (*context::current_ptr()).id }
    }

    /// Number of fibers alive in the process, main fibers included.
    pub fn live_count() -> usize {
        LIVE_FIBERS.load(Ordering::Relaxed)
    }

    /// Returns true when the caller runs on a fiber rather than on a thread's main stack.
    pub(crate) fn in_fiber() -> bool {
        let current = context::current_ptr();

        !current.is_null() && unsafe { !(*current).is_main() }
    }

    fn suspend(&self) {
        invariant!(!self.is_main(), "the main fiber of a thread cannot yield");

        let state = self.state();
        invariant!(
            state == State::Running || state == State::Term,
            "yield on fiber {} in state {state:?}",
            self.id
        );

        let to = self.return_target();
        trace!(fiber = self.id, ?state, "yield");
        context::set_current(to);

        let rc = unsafe { libc::swapcontext(self.context.get(), (*to).context.get()) };
        invariant!(rc == 0, "swapcontext failed while suspending fiber {}", self.id);
    }

    fn return_target(&self) -> *const Fiber {
        if self.run_in_scheduler {
            context::scheduler_fiber()
        } else {
            context::main_fiber()
        }
    }

    fn prepare_context(&self) {
        let Some(stack) = &self.stack else {
            return;
        };

        let context = self.context.get();
        unsafe {
            invariant!(
                libc::getcontext(context) == 0,
                "getcontext failed for fiber {}",
                self.id
            );

            // No successor context: the entry trampoline always yields one last time.
            (*context).uc_link = ptr::null_mut();
            (*context).uc_stack.ss_sp = stack.base().as_ptr().cast();
            (*context).uc_stack.ss_size = stack.len();
            (*context).uc_stack.ss_flags = 0;

            libc::makecontext(context, fiber_entry, 0);
        }
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        LIVE_FIBERS.fetch_sub(1, Ordering::Relaxed);

        let state = self.state();
        let expected = if self.is_main() {
            State::Running
        } else {
            State::Term
        };

        if state != expected {
            if std::thread::panicking() {
                error!(fiber = self.id, ?state, "fiber dropped in the wrong state while unwinding");
            } else {
                fatal(format_args!("fiber {} dropped in state {state:?}", self.id));
            }
        }

        if self.is_main() {
            context::clear_current(self);
        }
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("main", &self.is_main())
            .field("run_in_scheduler", &self.run_in_scheduler)
            .finish()
    }
}

extern "C" fn fiber_entry() {
    // SAFETY: resume() installs the fiber as current right before switching
    // onto its stack, and the resumer holds a strong reference meanwhile.
    let fiber = unsafe { &*context::current_ptr() };
    let entry = unsafe { (*fiber.entry.get()).take() };

    if let Some(entry) = entry
        && let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry))
    {
        // Unwinding cannot cross the context switch back to the resumer.
        error!(
            fiber = fiber.id,
            "fiber body panicked: {}",
            panic_message(payload.as_ref())
        );
        process::abort();
    }

    fiber.state.store(State::Term as u8, Ordering::Release);
    fiber.suspend();

    error!(fiber = fiber.id, "terminated fiber was switched to");
    process::abort();
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
