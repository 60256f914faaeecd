//! Domain model (ids, task types, queue options, broker states, errors, records).

pub mod errors;
pub mod ids;
pub mod models;
pub mod options;
pub mod state;
pub mod task;

pub use errors::TaskError;
pub use ids::{EventId, Id, IdMarker, TaskId, UserId};
pub use models::{Attendee, EmailPayload, Event, RsvpStatus, User};
pub use options::{EnqueueOptions, QueueOptions};
pub use state::{QueueCounts, TaskState};
pub use task::{QueuedTask, TaskKind, TaskType};

use std::time::Duration;

/// Lead time between a reminder firing and the event starting.
pub const EVENT_REMINDER_INTERVAL: Duration = Duration::from_secs(10 * 60);
