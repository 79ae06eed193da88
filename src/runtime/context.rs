//! Per-thread runtime context.
//!
//! Every OS thread that touches the runtime owns one [`ThreadContext`]. It
//! answers "who is calling me" for code that cannot take an explicit context
//! parameter, most notably the libc-shaped hook functions:
//!
//! - the fiber currently running on this thread (non-owning pointer);
//! - the thread's main fiber (owning, created lazily);
//! - the scheduling fiber that scheduler fibers yield back to, when it is not
//!   the main fiber (the caller fiber of a `use_caller` scheduler);
//! - the scheduler or reactor the thread is working for;
//! - whether syscall interception is enabled.
//!
//! # Fiber migration
//!
//! A fiber may be suspended on one thread and resumed on another. Every
//! accessor below is `#[inline(never)]` so the thread-local slot is looked up
//! again after each context switch instead of being cached by the optimizer
//! across a `yield`.

use crate::fiber::Fiber;
use crate::reactor::ReactorHandle;
use crate::runtime::Handle;

use std::cell::{Cell, RefCell};
use std::ptr;
use std::sync::Arc;

pub(crate) struct ThreadContext {
    current: Cell<*const Fiber>,
    main: RefCell<Option<Arc<Fiber>>>,
    scheduler_fiber: Cell<*const Fiber>,
    handle: RefCell<Option<Handle>>,
    hooked: Cell<bool>,
}

impl ThreadContext {
    const fn new() -> Self {
        Self {
            current: Cell::new(ptr::null()),
            main: RefCell::new(None),
            scheduler_fiber: Cell::new(ptr::null()),
            handle: RefCell::new(None),
            hooked: Cell::new(false),
        }
    }
}

thread_local! {
    static CONTEXT: ThreadContext = const { ThreadContext::new() };
}

/// Returns the calling thread's main fiber, creating it on first use.
///
/// Creating the main fiber also makes it the current fiber.
#[inline(never)]
pub(crate) fn main_fiber() -> *const Fiber {
    CONTEXT.with(|context| {
        let mut main = context.main.borrow_mut();
        let fiber = main.get_or_insert_with(Fiber::new_main);
        let fiber = Arc::as_ptr(fiber);

        if context.current.get().is_null() {
            context.current.set(fiber);
        }

        fiber
    })
}

#[inline(never)]
pub(crate) fn current_ptr() -> *const Fiber {
    CONTEXT.with(|context| context.current.get())
}

#[inline(never)]
pub(crate) fn set_current(fiber: *const Fiber) {
    CONTEXT.with(|context| context.current.set(fiber));
}

/// Forgets `fiber` as the current fiber. Used by the main fiber on thread exit.
#[inline(never)]
pub(crate) fn clear_current(fiber: *const Fiber) {
    // The context may already be torn down when the main fiber is dropped with it.
    let _ = CONTEXT.try_with(|context| {
        if ptr::eq(context.current.get(), fiber) {
            context.current.set(ptr::null());
        }
    });
}

/// Returns the fiber that scheduler fibers on this thread yield back to.
///
/// This is the caller fiber on the thread that built a `use_caller`
/// scheduler and the main fiber everywhere else.
#[inline(never)]
pub(crate) fn scheduler_fiber() -> *const Fiber {
    let fiber = CONTEXT.with(|context| context.scheduler_fiber.get());

    if fiber.is_null() { main_fiber() } else { fiber }
}

#[inline(never)]
pub(crate) fn set_scheduler_fiber(fiber: *const Fiber) {
    CONTEXT.with(|context| context.scheduler_fiber.set(fiber));
}

/// Returns the scheduler or reactor this thread works for, if any.
#[inline(never)]
pub(crate) fn handle() -> Option<Handle> {
    CONTEXT.with(|context| context.handle.borrow().clone())
}

/// Installs (or clears) the scheduler this thread works for, returning the previous one.
#[inline(never)]
pub(crate) fn set_handle(handle: Option<Handle>) -> Option<Handle> {
    CONTEXT.with(|context| context.handle.replace(handle))
}

/// Returns the reactor this thread works for, if it works for one.
#[inline(never)]
pub(crate) fn reactor() -> Option<ReactorHandle> {
    CONTEXT.with(|context| match &*context.handle.borrow() {
        Some(Handle::Reactor(reactor)) => Some(reactor.clone()),
        _ => None,
    })
}

#[inline(never)]
pub(crate) fn is_hooked() -> bool {
    CONTEXT
        .try_with(|context| context.hooked.get())
        .unwrap_or(false)
}

#[inline(never)]
pub(crate) fn set_hooked(enabled: bool) -> bool {
    CONTEXT.with(|context| context.hooked.replace(enabled))
}
