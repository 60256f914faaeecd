//! Durable queue contract: the broker port, its in-memory implementation,
//! retry-delay policy, and the client the orchestration layer talks to.

mod client;
mod memory;
mod record;
mod retry;

pub use client::{QueueClient, QueueDefaults};
pub use memory::InMemoryBroker;
pub use record::TaskRecord;
pub use retry::{RetryDelayFn, RetryDelays, RetryPolicy};

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::{EnqueueOptions, QueueCounts, QueuedTask, TaskError, TaskId, TaskState};

/// Snapshot of a task as the broker sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub queue: String,
    pub task: QueuedTask,
    pub state: TaskState,
    pub max_retry: u32,
    /// Retries already performed. The first attempt is not a retry.
    pub retried: u32,
    pub last_error: Option<String>,
    /// Written by the handler on success.
    pub result: Option<String>,
    /// When a scheduled or retrying task becomes due.
    pub next_process_at: Option<tokio::time::Instant>,
}

/// A queue name with its share of dispatch attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueWeight {
    pub name: String,
    pub weight: u32,
}

impl QueueWeight {
    pub fn new(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// A leased task. The dispatch worker owns it and must `ack`, `fail` or
/// `discard` it.
///
/// The broker owns state transitions; the worker only reports outcomes.
#[async_trait]
pub trait TaskLease: Send {
    fn info(&self) -> &TaskInfo;

    /// Flips to `true` when `cancel_processing` is called for this task.
    fn cancelled(&self) -> watch::Receiver<bool>;

    async fn ack(self: Box<Self>, result: Option<String>) -> Result<(), TaskError>;

    /// Report a failed attempt. The broker decides between `Retry` (due
    /// after `retry_delay`) and `Dead`. Returns `None` if the task was
    /// deleted while it ran.
    async fn fail(
        self: Box<Self>,
        error: String,
        retry_delay: Duration,
    ) -> Result<Option<TaskState>, TaskError>;

    /// Drop the task without retrying it.
    async fn discard(self: Box<Self>) -> Result<(), TaskError>;
}

/// Broker port.
///
/// Delays are held by the broker, so a task survives whatever happens to the
/// process that enqueued it.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn enqueue(&self, task: QueuedTask, opts: EnqueueOptions)
    -> Result<TaskInfo, TaskError>;

    /// Wait until a task is ready in one of `queues` and lease it.
    async fn lease(&self, queues: &[QueueWeight]) -> Result<Box<dyn TaskLease>, TaskError>;

    /// `TaskError::NotFound` if the queue holds no task with that id.
    async fn get_task_info(&self, queue: &str, id: &TaskId) -> Result<TaskInfo, TaskError>;

    /// Fails for an active task unless its cancellation was requested first.
    async fn delete_task(&self, queue: &str, id: &TaskId) -> Result<(), TaskError>;

    /// Best effort: signals the worker running `id`; a no-op if none is.
    async fn cancel_processing(&self, id: &TaskId) -> Result<(), TaskError>;

    async fn counts_by_state(&self, queue: &str) -> Result<QueueCounts, TaskError>;

    /// Drop completed tasks whose retention has elapsed. Returns how many.
    async fn purge_expired(&self) -> Result<usize, TaskError>;
}
