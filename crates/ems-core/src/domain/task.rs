use serde::{Deserialize, Serialize};
use std::fmt;

/// The task classes this system enqueues.
///
/// The strings are the wire contract with the broker: the dispatcher and
/// the retry-delay policy are keyed on them, so they must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    InvitationEmail,
    EventReminder,
    EventReminderEmail,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [
        TaskKind::InvitationEmail,
        TaskKind::EventReminder,
        TaskKind::EventReminderEmail,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            TaskKind::InvitationEmail => "invitation_email",
            TaskKind::EventReminder => "event_reminder",
            TaskKind::EventReminderEmail => "event_reminder_email",
        }
    }

    pub fn task_type(self) -> TaskType {
        TaskType::new(self.as_str())
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch type string of a queued task.
///
/// Kept open (not just `TaskKind`) because the broker may hold tasks of
/// types this process has no handler for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<TaskKind> for TaskType {
    fn from(kind: TaskKind) -> Self {
        kind.task_type()
    }
}

/// An opaque serialized instruction tagged with its dispatch type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTask {
    task_type: TaskType,
    payload: Vec<u8>,
}

impl QueuedTask {
    pub fn new(task_type: impl Into<TaskType>, payload: Vec<u8>) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
        }
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
