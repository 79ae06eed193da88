//! Timers: deadlines ordered for a reactor's idle loop.
//!
//! - [`ClockManager`] keeps armed deadlines ordered and drains expired ones
//! - [`Clock`] is the handle returned when arming one (cancel, refresh, reset)
//!
//! Fibers normally reach timers through [`hook::sleep`](crate::hook::sleep)
//! or a socket timeout rather than arming clocks by hand.
//!
//! # Example: timeout guard
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::time::Duration;
//!
//! let fired = Arc::new(AtomicBool::new(false));
//! let flag = Arc::clone(&fired);
//! let clock = reactor.add_cond_clock(
//!     Duration::from_millis(100),
//!     move || flag.store(true, Ordering::SeqCst),
//!     Arc::downgrade(&fired),
//!     false,
//! );
//!
//! // Either the clock fires first, or it is canceled and never touches the flag.
//! clock.cancel();
//! ```

mod clock;

pub use clock::{Clock, ClockCallback, ClockManager};
