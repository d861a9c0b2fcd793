//! Scheduling
//!
//! Deferred work in two layers:
//!
//! - the **scheduler** batches watcher re-runs into one flush per tick,
//!   ordered by watcher id
//! - the **tick queue** runs deferred callbacks, the flush among them, once
//!   the current synchronous work is done
//!
//! Both live on the [`Runtime`](crate::reactive::Runtime) as inherent
//! methods; this module only holds their state and the driver setting.

mod scheduler;
mod tick;

pub(crate) use scheduler::SchedulerState;
pub(crate) use tick::TickQueue;
pub use tick::TickMode;
