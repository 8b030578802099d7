//! Scheduler Module
//!
//! Priority queue with retry and timeout orchestration on top of the
//! worker pool. Callers get a `ResultHandle` per task; every failure is
//! delivered through that handle.

mod actor;
mod priority;
mod task;

pub use actor::{SchedulerStats, TaskScheduler};
pub use priority::{Priority, PriorityQueue};
pub use task::{ResultHandle, TaskOutput, TaskRequest, TaskState};
