//! Direct email delivery through the worker pool.

use std::sync::Arc;

use crate::domain::{EmailPayload, Event, TaskError, UserId};
use crate::ports::{MailTransport, RepositoryError, UserRepository};
use crate::worker::{Task, WorkerPool};

use super::emails;

/// Sends email either inline or as pool tasks, one per recipient.
pub struct MailService {
    transport: Arc<dyn MailTransport>,
    users: Arc<dyn UserRepository>,
    pool: Arc<WorkerPool>,
    public_url: String,
    max_retries: u32,
}

impl MailService {
    pub const DEFAULT_MAX_RETRIES: u32 = 2;

    pub fn new(
        transport: Arc<dyn MailTransport>,
        users: Arc<dyn UserRepository>,
        pool: Arc<WorkerPool>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            users,
            pool,
            public_url: public_url.into(),
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }

    /// Pool retries per recipient after the first failed attempt.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub async fn send(&self, payload: &EmailPayload) -> Result<(), TaskError> {
        self.transport.send_email(payload).await?;
        tracing::info!(to = %payload.mail_to, subject = %payload.subject, "email sent");
        Ok(())
    }

    /// Submit one delivery task per payload. A failing recipient is logged
    /// once its retries run out and never affects the others.
    ///
    /// Returns how many tasks the pool accepted.
    pub async fn send_bulk(&self, payloads: Vec<EmailPayload>) -> usize {
        let total = payloads.len();
        let mut submitted = 0;
        for payload in payloads {
            let to = payload.mail_to.clone();
            let payload = Arc::new(payload);
            let transport = Arc::clone(&self.transport);

            let task = Task::new(
                move || {
                    let transport = Arc::clone(&transport);
                    let payload = Arc::clone(&payload);
                    async move {
                        transport.send_email(&payload).await?;
                        tracing::debug!(to = %payload.mail_to, "email delivered");
                        Ok(())
                    }
                },
                move |err| tracing::error!(to = %to, error = %err, "email delivery failed"),
                self.max_retries,
            );
            if self.pool.add_task(task).await {
                submitted += 1;
            } else {
                tracing::warn!("worker pool stopped; remaining emails dropped");
                break;
            }
        }
        tracing::info!(submitted, total, "bulk email submitted");
        submitted
    }

    /// Invite `user_ids` to `event` by email, bypassing the broker.
    pub async fn send_invitation_emails(
        &self,
        user_ids: &[UserId],
        event: &Event,
    ) -> Result<usize, TaskError> {
        let users = match self.users.read_users_by_ids(user_ids).await {
            Ok(users) => users,
            Err(RepositoryError::NotFound(_)) => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let payloads = users
            .iter()
            .map(|user| emails::invitation_email(user, event, &self.public_url))
            .collect();
        Ok(self.send_bulk(payloads).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryStore;
    use crate::service::testing::{BrokenStore, RecordingMail, event_starting_at, user};
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn payload(to: &str) -> EmailPayload {
        EmailPayload {
            mail_to: to.to_string(),
            subject: "hello".into(),
            body: json!({}),
        }
    }

    fn pool() -> Arc<WorkerPool> {
        let pool = WorkerPool::new(2, 8)
            .unwrap()
            .with_backoff_unit(Duration::from_millis(1));
        pool.start();
        Arc::new(pool)
    }

    fn service(mail: Arc<RecordingMail>, users: Arc<dyn UserRepository>) -> MailService {
        MailService::new(mail, users, pool(), "http://ems.local")
    }

    #[tokio::test]
    async fn bulk_delivery_survives_a_failing_recipient() {
        let mail = Arc::new(RecordingMail::rejecting(&["b@example.com"]));
        let svc = service(Arc::clone(&mail), Arc::new(InMemoryStore::new()));

        let submitted = svc
            .send_bulk(vec![
                payload("a@example.com"),
                payload("b@example.com"),
                payload("c@example.com"),
            ])
            .await;
        svc.pool.stop().await;

        assert_eq!(submitted, 3);
        assert_eq!(mail.sent_to(), vec!["a@example.com", "c@example.com"]);
    }

    #[tokio::test]
    async fn invitations_go_to_existing_users() {
        let mail = Arc::new(RecordingMail::default());
        let store = Arc::new(InMemoryStore::new());
        store.insert_user(user(1)).await;
        store.insert_user(user(2)).await;
        let svc = service(Arc::clone(&mail), store);
        let event = event_starting_at(5, Utc::now());

        let submitted = svc
            .send_invitation_emails(&[UserId::new(1), UserId::new(2), UserId::new(3)], &event)
            .await
            .unwrap();
        svc.pool.stop().await;

        assert_eq!(submitted, 2);
        assert_eq!(mail.sent_to(), vec!["u1@example.com", "u2@example.com"]);
        let sent = mail.sent();
        assert!(sent.iter().all(|p| p.subject == "Invitation to Event: Event 5"));
        assert_eq!(sent[0].body["rsvp_link"], "http://ems.local/v1/events/5/rsvp");
    }

    #[tokio::test]
    async fn no_known_users_sends_nothing() {
        let mail = Arc::new(RecordingMail::default());
        let svc = service(Arc::clone(&mail), Arc::new(InMemoryStore::new()));

        let submitted = svc
            .send_invitation_emails(&[UserId::new(1)], &event_starting_at(5, Utc::now()))
            .await
            .unwrap();

        assert_eq!(submitted, 0);
    }

    #[tokio::test]
    async fn broken_user_lookup_is_an_error() {
        let svc = service(Arc::new(RecordingMail::default()), Arc::new(BrokenStore));
        let err = svc
            .send_invitation_emails(&[UserId::new(1)], &event_starting_at(5, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Repository(_)));
    }

    #[tokio::test]
    async fn inline_send_reports_transport_errors() {
        let mail = Arc::new(RecordingMail::rejecting(&["x@example.com"]));
        let svc = service(Arc::clone(&mail), Arc::new(InMemoryStore::new()));

        assert!(svc.send(&payload("ok@example.com")).await.is_ok());
        let err = svc.send(&payload("x@example.com")).await.unwrap_err();
        assert!(matches!(err, TaskError::Mail(_)));
    }

    #[tokio::test]
    async fn stopped_pool_accepts_nothing() {
        let svc = service(Arc::new(RecordingMail::default()), Arc::new(InMemoryStore::new()));
        svc.pool.stop().await;

        assert_eq!(svc.send_bulk(vec![payload("a@example.com")]).await, 0);
    }
}
