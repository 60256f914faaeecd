//! In-memory users, events and RSVPs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{Attendee, Event, EventId, RsvpStatus, User, UserId};
use crate::ports::{EventRepository, RepositoryError, UserRepository};

#[derive(Default)]
struct StoreState {
    users: HashMap<UserId, User>,
    events: HashMap<EventId, Event>,
    /// Per event, in the order invitations were made.
    rsvps: HashMap<EventId, Vec<(UserId, RsvpStatus)>>,
}

/// Store for the demo binary and tests.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.state.write().await.users.insert(user.id, user);
    }

    pub async fn insert_event(&self, event: Event) {
        self.state.write().await.events.insert(event.id, event);
    }

    pub async fn event(&self, id: EventId) -> Option<Event> {
        self.state.read().await.events.get(&id).cloned()
    }

    /// Record `user`'s response to `event`, replacing an earlier one.
    pub async fn set_rsvp(&self, event: EventId, user: UserId, status: RsvpStatus) {
        let mut state = self.state.write().await;
        let rsvps = state.rsvps.entry(event).or_default();
        match rsvps.iter_mut().find(|(u, _)| *u == user) {
            Some(entry) => entry.1 = status,
            None => rsvps.push((user, status)),
        }
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    /// `NotFound` when none of `ids` exists.
    async fn read_users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        let state = self.state.read().await;
        let users: Vec<User> = ids
            .iter()
            .filter_map(|id| state.users.get(id).cloned())
            .collect();
        if users.is_empty() {
            return Err(RepositoryError::NotFound(format!("users {ids:?}")));
        }
        Ok(users)
    }
}

#[async_trait]
impl EventRepository for InMemoryStore {
    async fn read_accepted_attendees(
        &self,
        event: EventId,
    ) -> Result<Vec<Attendee>, RepositoryError> {
        let state = self.state.read().await;
        if !state.events.contains_key(&event) {
            return Err(RepositoryError::NotFound(event.to_string()));
        }
        let attendees = state
            .rsvps
            .get(&event)
            .into_iter()
            .flatten()
            .filter(|(_, status)| *status == RsvpStatus::Accepted)
            .filter_map(|(user, status)| {
                state.users.get(user).map(|u| Attendee {
                    user: u.clone(),
                    status: *status,
                })
            })
            .collect();
        Ok(attendees)
    }
}
