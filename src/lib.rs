//! Stackful fiber runtime with an N-thread scheduler, an epoll reactor and a
//! syscall hook layer.
//!
//! Code inside a fiber is written as plain blocking calls. On a reactor
//! worker with hooking enabled, a call that would block parks only the
//! calling fiber; the worker thread keeps running other tasks.
//!
//! # Architecture
//!
//! - **Fiber**: user-space execution context with its own stack, switched by `resume`/`yield_now`
//! - **Scheduler**: pool of worker threads draining a shared queue of fibers and closures
//! - **Reactor**: scheduler whose idle workers wait in epoll and on the clock set
//! - **ClockManager**: ordered one-shot and recurring timers
//! - **hook**: `read`/`write`/`accept`/`connect`/`sleep`/... that suspend fibers instead of threads
//! - **net**: `TcpListener`/`TcpStream` on top of the hook layer
//! - **RuntimeBuilder**: fluent configuration of schedulers and reactors
//!
//! # Example
//!
//! ```ignore
//! use fiber_reactor::{Reactor, hook};
//! use std::time::Duration;
//!
//! let reactor = Reactor::new(2)?;
//! for i in 0..4 {
//!     reactor.spawn(move || {
//!         hook::sleep(Duration::from_millis(10 * i));
//!         println!("task {i} done");
//!     });
//! }
//! reactor.stop();
//! ```

mod builder;
pub mod error;
pub mod fiber;
pub mod hook;
pub mod net;
pub mod reactor;
mod runtime;
mod task;
pub mod time;
mod utils;

pub use builder::{RuntimeBuilder, RuntimeConfig};
pub use error::{Error, Result};
pub use fiber::{DEFAULT_STACK_SIZE, Fiber, State};
pub use reactor::{Direction, Reactor, ReactorHandle};
pub use runtime::{Handle, Scheduler, SchedulerHandle};
pub use task::Task;
pub use time::{Clock, ClockManager};
