use thiserror::Error;

use super::{TaskId, TaskType};

/// Errors of the task subsystem.
///
/// Only `Broker` and `Repository` are infrastructure failures; the rest are
/// either benign signals (`DuplicateTask`, `NotFound`) or rejections of one
/// specific task.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("task already exists: {0}")]
    DuplicateTask(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("reminder not scheduled: trigger time {trigger_at} is not in the future")]
    ReminderNotScheduled {
        trigger_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("broker error: {0}")]
    Broker(String),

    #[error("handler not found for task_type={0}")]
    HandlerNotFound(TaskType),

    #[error("handler failed: {0}")]
    HandlerExecution(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("mail delivery failed: {0}")]
    Mail(String),
}

impl TaskError {
    pub fn duplicate(task_id: &TaskId) -> Self {
        TaskError::DuplicateTask(task_id.to_string())
    }

    pub fn task_not_found(task_id: &TaskId) -> Self {
        TaskError::NotFound(format!("task {task_id}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TaskError::NotFound(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, TaskError::DuplicateTask(_))
    }
}
