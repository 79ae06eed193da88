//! Runtime subsystem modules.

pub(crate) mod context;
pub(crate) mod core;
pub(crate) mod driver;
mod handle;
pub(crate) mod queue;
mod scheduler;

pub use handle::Handle;
pub use scheduler::{Scheduler, SchedulerHandle};
