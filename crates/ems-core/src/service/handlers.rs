//! Handlers for the three notification task types.

use std::sync::Arc;

use async_trait::async_trait;

use super::notifications::NotificationScheduler;
use crate::app::ServerBuilder;
use crate::domain::{EmailPayload, TaskError, TaskKind};
use crate::ports::MailTransport;
use crate::queue::Broker;
use crate::typed::{
    EventReminder, Handler, HandlerResult, InvitationEmail, RegistryError, ReminderEmail,
};

async fn deliver(mail: &dyn MailTransport, payload: &EmailPayload) -> Result<(), TaskError> {
    mail.send_email(payload).await.map_err(|e| {
        tracing::error!(to = %payload.mail_to, error = %e, "email delivery failed");
        TaskError::HandlerExecution(e.to_string())
    })
}

pub struct InvitationEmailHandler {
    mail: Arc<dyn MailTransport>,
}

impl InvitationEmailHandler {
    pub fn new(mail: Arc<dyn MailTransport>) -> Self {
        Self { mail }
    }
}

#[async_trait]
impl Handler<InvitationEmail> for InvitationEmailHandler {
    async fn handle(&self, task: InvitationEmail) -> HandlerResult {
        let InvitationEmail(payload) = task;
        deliver(self.mail.as_ref(), &payload).await?;
        tracing::info!(to = %payload.mail_to, "invitation email sent");
        Ok(Some(format!("Email sent successfully to {}", payload.mail_to)))
    }
}

/// Runs when an event's reminder is due: fans out one reminder email task per
/// accepted attendee.
pub struct EventReminderHandler {
    scheduler: Arc<NotificationScheduler>,
}

impl EventReminderHandler {
    pub fn new(scheduler: Arc<NotificationScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Handler<EventReminder> for EventReminderHandler {
    async fn handle(&self, task: EventReminder) -> HandlerResult {
        let EventReminder(event) = task;
        let fan_out = self.scheduler.create_reminder_email_tasks(&event).await?;
        // Re-running is safe: every email task id is deterministic.
        if fan_out.failed > 0 {
            return Err(TaskError::HandlerExecution(format!(
                "{} of {} reminder email tasks for event {} could not be enqueued",
                fan_out.failed,
                fan_out.failed + fan_out.enqueued,
                event.id
            )));
        }
        Ok(Some(format!(
            "Event reminder email tasks created successfully for event: {}",
            event.title
        )))
    }
}

pub struct ReminderEmailHandler {
    mail: Arc<dyn MailTransport>,
}

impl ReminderEmailHandler {
    pub fn new(mail: Arc<dyn MailTransport>) -> Self {
        Self { mail }
    }
}

#[async_trait]
impl Handler<ReminderEmail> for ReminderEmailHandler {
    async fn handle(&self, task: ReminderEmail) -> HandlerResult {
        let ReminderEmail(payload) = task;
        deliver(self.mail.as_ref(), &payload).await?;
        tracing::info!(to = %payload.mail_to, "event reminder email sent");
        Ok(Some(format!(
            "Event reminder email sent successfully to {}",
            payload.mail_to
        )))
    }
}

/// A [`ServerBuilder`] with all notification handlers registered, serving the
/// scheduler's queue with its retry delays.
pub fn server_builder(
    broker: Arc<dyn Broker>,
    scheduler: Arc<NotificationScheduler>,
    mail: Arc<dyn MailTransport>,
) -> Result<ServerBuilder, RegistryError> {
    let expected: Vec<&str> = TaskKind::ALL.iter().map(|k| k.as_str()).collect();
    let queue = scheduler.client().queue().to_string();
    let retry_delays = scheduler.settings().retry_delays();

    Ok(ServerBuilder::new(broker)
        .register::<InvitationEmail, _>(InvitationEmailHandler::new(Arc::clone(&mail)))?
        .register::<EventReminder, _>(EventReminderHandler::new(scheduler))?
        .register::<ReminderEmail, _>(ReminderEmailHandler::new(mail))?
        .expect_tasks(&expected)
        .queue(queue, 1)
        .retry_delays(retry_delays))
}
