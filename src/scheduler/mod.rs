//! Task scheduling
//!
//! This module owns crawl tasks from submission to their terminal state:
//! - Task model (ids, priorities, statuses, retry budget)
//! - Priority dispatch with FIFO tie-break under a concurrency bound
//! - Retry-or-fail handling driven by the error classifier

mod engine;
mod task;

pub use engine::{Scheduler, SchedulerBuilder, SchedulerStats};
pub use task::{Priority, Task, TaskId, TaskSpec, TaskStatus};
