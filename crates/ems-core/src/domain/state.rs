//! Broker-side task state machine.

use serde::{Deserialize, Serialize};

/// Task state as tracked by the broker.
///
/// State transitions:
/// - Scheduled -> Pending (delay elapsed)
/// - Pending -> Active -> Completed
/// - Pending -> Active -> Retry -> Pending (until max retry)
/// - Pending -> Active -> Dead (retries exhausted)
///
/// Any non-active state can be deleted outright; an active task must be
/// cancelled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for its delay to elapse.
    Scheduled,

    /// Ready to be leased.
    Pending,

    /// Leased by a dispatch worker.
    Active,

    /// Failed; waiting for the retry delay.
    Retry,

    /// Handler succeeded; kept until retention elapses.
    Completed,

    /// Retries exhausted. Never resurrected automatically.
    Dead,
}

impl TaskState {
    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Active)
    }
}

/// Per-state counts for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub scheduled: usize,
    pub pending: usize,
    pub active: usize,
    pub retry: usize,
    pub completed: usize,
    pub dead: usize,
}

impl QueueCounts {
    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Scheduled => self.scheduled += 1,
            TaskState::Pending => self.pending += 1,
            TaskState::Active => self.active += 1,
            TaskState::Retry => self.retry += 1,
            TaskState::Completed => self.completed += 1,
            TaskState::Dead => self.dead += 1,
        }
    }

    /// Tasks that will still be dispatched at some point.
    pub fn live(&self) -> usize {
        self.scheduled + self.pending + self.active + self.retry
    }
}
