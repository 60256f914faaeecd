//! In-process execution: a bounded worker pool and timers.

mod pool;
mod scheduler;
mod task;

pub use pool::{PoolError, WorkerPool};
pub use scheduler::{OneShot, Scheduler, StopHandle};
pub use task::{Executor, Task};
