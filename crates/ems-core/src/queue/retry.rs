//! Retry timing for broker tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{QueuedTask, TaskError, TaskType};

/// Default exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    pub multiplier: f64,

    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retried + 1`:
    /// `base_delay * multiplier^retried`, capped at `max_delay`.
    ///
    /// With base 2s and multiplier 2: 2s, 4s, 8s, 16s, ...
    pub fn next_delay(&self, retried: u32) -> Duration {
        let exp = i32::try_from(retried).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Custom backoff curve: `(retried, error, task) -> delay`.
pub type RetryDelayFn = Arc<dyn Fn(u32, &TaskError, &QueuedTask) -> Duration + Send + Sync>;

/// Retry delays keyed by task type.
///
/// Types without an entry fall back to the default [`RetryPolicy`].
#[derive(Clone, Default)]
pub struct RetryDelays {
    default: RetryPolicy,
    per_type: HashMap<TaskType, RetryDelayFn>,
}

impl RetryDelays {
    pub fn new(default: RetryPolicy) -> Self {
        Self {
            default,
            per_type: HashMap::new(),
        }
    }

    /// Same delay before every retry of `task_type`.
    pub fn fixed(self, task_type: impl Into<TaskType>, delay: Duration) -> Self {
        self.with(task_type, move |_, _, _| delay)
    }

    pub fn with<F>(mut self, task_type: impl Into<TaskType>, f: F) -> Self
    where
        F: Fn(u32, &TaskError, &QueuedTask) -> Duration + Send + Sync + 'static,
    {
        self.per_type.insert(task_type.into(), Arc::new(f));
        self
    }

    pub fn delay_for(&self, retried: u32, err: &TaskError, task: &QueuedTask) -> Duration {
        match self.per_type.get(task.task_type()) {
            Some(f) => f(retried, err, task),
            None => self.default.next_delay(retried),
        }
    }
}

impl std::fmt::Debug for RetryDelays {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryDelays")
            .field("default", &self.default)
            .field("types", &self.per_type.keys().collect::<Vec<_>>())
            .finish()
    }
}
