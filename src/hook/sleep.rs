use crate::fiber::Fiber;
use crate::hook::io::parking_reactor;

use std::thread;
use std::time::Duration;
use tracing::trace;

/// Suspends the calling fiber for `duration`.
///
/// Inside a fiber on a hooked reactor thread this arms a one-shot clock that
/// reschedules the fiber and yields, leaving the worker free to run other
/// tasks. Anywhere else it blocks the thread like [`std::thread::sleep`].
pub fn sleep(duration: Duration) {
    let Some(reactor) = parking_reactor() else {
        thread::sleep(duration);
        return;
    };

    let fiber = Fiber::current();
    trace!(fiber = fiber.id(), ?duration, "fiber sleeping");

    let scheduler = reactor.clone();
    reactor.add_clock(duration, move || scheduler.schedule(fiber.clone()), false);

    Fiber::yield_now();
}
