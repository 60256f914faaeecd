//! Task record: broker metadata plus the queued task.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::TaskInfo;
use crate::domain::{QueuedTask, TaskId, TaskState};

/// The single source of truth for one task's state.
///
/// Ready and scheduled queues hold keys only; every transition happens here.
#[derive(Debug)]
pub struct TaskRecord {
    pub id: TaskId,
    pub queue: String,
    pub task: QueuedTask,
    pub state: TaskState,

    /// Distinguishes this record from an earlier one with the same id, so a
    /// lease on a deleted task cannot touch its replacement.
    pub seq: u64,

    pub max_retry: u32,
    pub retried: u32,
    pub retention: Duration,
    pub last_error: Option<String>,
    pub result: Option<String>,

    pub process_at: Instant,
    pub expires_at: Option<Instant>,

    /// Uniqueness lock held by this record, released when it leaves the
    /// live states.
    pub unique_key: Option<String>,

    pub cancel_tx: Option<watch::Sender<bool>>,
    pub cancel_requested: bool,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        queue: String,
        task: QueuedTask,
        seq: u64,
        max_retry: u32,
        retention: Duration,
        delay: Option<Duration>,
    ) -> Self {
        let now = Instant::now();
        let (state, process_at) = match delay {
            Some(d) if !d.is_zero() => (TaskState::Scheduled, now + d),
            _ => (TaskState::Pending, now),
        };
        Self {
            id,
            queue,
            task,
            state,
            seq,
            max_retry,
            retried: 0,
            retention,
            last_error: None,
            result: None,
            process_at,
            expires_at: None,
            unique_key: None,
            cancel_tx: None,
            cancel_requested: false,
        }
    }

    pub fn info(&self) -> TaskInfo {
        let next_process_at = matches!(self.state, TaskState::Scheduled | TaskState::Retry)
            .then_some(self.process_at);
        TaskInfo {
            id: self.id.clone(),
            queue: self.queue.clone(),
            task: self.task.clone(),
            state: self.state,
            max_retry: self.max_retry,
            retried: self.retried,
            last_error: self.last_error.clone(),
            result: self.result.clone(),
            next_process_at,
        }
    }

    /// Scheduled/Retry -> Pending.
    pub fn promote(&mut self) {
        self.state = TaskState::Pending;
    }

    /// Pending -> Active. Returns the cancellation receiver for the lease.
    pub fn start_attempt(&mut self) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.state = TaskState::Active;
        self.cancel_tx = Some(tx);
        self.cancel_requested = false;
        rx
    }

    pub fn request_cancel(&mut self) {
        self.cancel_requested = true;
        if let Some(tx) = &self.cancel_tx {
            tx.send_replace(true);
        }
    }

    pub fn mark_completed(&mut self, result: Option<String>, now: Instant) {
        self.state = TaskState::Completed;
        self.result = result;
        self.expires_at = Some(now + self.retention);
        self.cancel_tx = None;
    }

    pub fn mark_dead(&mut self, error: String) {
        self.state = TaskState::Dead;
        self.last_error = Some(error);
        self.cancel_tx = None;
    }

    pub fn schedule_retry(&mut self, process_at: Instant, error: String) {
        self.state = TaskState::Retry;
        self.retried += 1;
        self.process_at = process_at;
        self.last_error = Some(error);
        self.cancel_tx = None;
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retried >= self.max_retry
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.state == TaskState::Completed && self.expires_at.is_some_and(|at| at <= now)
    }
}
