//! Fixtures shared by the service tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Attendee, EmailPayload, Event, EventId, User, UserId};
use crate::ports::{EventRepository, MailError, MailTransport, RepositoryError, UserRepository};

pub fn user(id: i64) -> User {
    User {
        id: UserId::new(id),
        name: format!("User {id}"),
        email: format!("u{id}@example.com"),
    }
}

pub fn event_starting_at(id: i64, start_time: DateTime<Utc>) -> Event {
    Event {
        id: EventId::new(id),
        title: format!("Event {id}"),
        description: None,
        location: None,
        start_time,
        end_time: None,
        created_by: None,
    }
}

/// Records delivered emails; recipients in `rejects` always fail.
#[derive(Default)]
pub struct RecordingMail {
    sent: Mutex<Vec<EmailPayload>>,
    rejects: HashSet<String>,
}

impl RecordingMail {
    pub fn rejecting(recipients: &[&str]) -> Self {
        Self {
            sent: Mutex::default(),
            rejects: recipients.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn sent_to(&self) -> Vec<String> {
        let mut to: Vec<String> = self
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.mail_to.clone())
            .collect();
        to.sort();
        to
    }

    pub fn sent(&self) -> Vec<EmailPayload> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingMail {
    async fn send_email(&self, payload: &EmailPayload) -> Result<(), MailError> {
        if self.rejects.contains(&payload.mail_to) {
            return Err(MailError::Status {
                status: 503,
                to: payload.mail_to.clone(),
            });
        }
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// A store whose every lookup fails.
pub struct BrokenStore;

#[async_trait]
impl UserRepository for BrokenStore {
    async fn read_users_by_ids(&self, _ids: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        Err(RepositoryError::Backend("connection refused".into()))
    }
}

#[async_trait]
impl EventRepository for BrokenStore {
    async fn read_accepted_attendees(
        &self,
        _event: EventId,
    ) -> Result<Vec<Attendee>, RepositoryError> {
        Err(RepositoryError::Backend("connection refused".into()))
    }
}
