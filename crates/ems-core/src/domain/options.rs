//! Per-enqueue overrides.

use std::time::Duration;

use super::TaskId;

/// Sparse overrides applied on top of the broker defaults.
///
/// A zero / empty field means "use the default"; see
/// [`QueueClient::resolve_options`](crate::queue::QueueClient::resolve_options).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub task_id: Option<TaskId>,
    pub max_retry: u32,
    pub queue: Option<String>,
    pub retention: Duration,
    pub delay: Duration,
    pub uniqueness_window: Duration,
}

impl QueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task_id(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_uniqueness_window(mut self, window: Duration) -> Self {
        self.uniqueness_window = window;
        self
    }
}

/// Fully resolved options as the broker receives them.
///
/// Unlike [`QueueOptions`] every field here has a definite value; the
/// optional ones stay optional because "not set" is meaningful to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub task_id: Option<TaskId>,
    pub queue: String,
    pub max_retry: u32,
    pub retention: Duration,
    pub delay: Option<Duration>,
    pub uniqueness_window: Option<Duration>,
}
