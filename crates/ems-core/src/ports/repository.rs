//! Persistence ports consumed by the scheduling policy.
//!
//! The relational store itself is out of scope; these traits are the narrow
//! slice of it the task subsystem needs.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Attendee, EventId, TaskError, User, UserId};

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Treated as "zero results" by callers, never as a failure.
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Backend(String),
}

impl From<RepositoryError> for TaskError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => TaskError::NotFound(what),
            RepositoryError::Backend(msg) => TaskError::Repository(msg),
        }
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Users for the given ids. Unknown ids are simply absent from the result.
    async fn read_users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Attendees of `event` whose RSVP status is accepted.
    async fn read_accepted_attendees(
        &self,
        event: EventId,
    ) -> Result<Vec<Attendee>, RepositoryError>;
}
