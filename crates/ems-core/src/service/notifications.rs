//! Notification scheduling: which tasks to enqueue, when, and under which id.
//!
//! Every task gets a deterministic id, and every enqueue first removes a
//! previous instance with that id. Re-running any operation here therefore
//! leaves at most one live task per (kind, user, event).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::emails;
use crate::domain::{
    EVENT_REMINDER_INTERVAL, Event, QueueOptions, QueuedTask, RsvpStatus, TaskError, TaskId,
    TaskKind, UserId,
};
use crate::ports::{Clock, EventRepository, RepositoryError, UserRepository};
use crate::queue::{QueueClient, RetryDelays, RetryPolicy};
use crate::typed::{EventReminder, InvitationEmail, ReminderEmail};

/// Enqueue settings of one task class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskClass {
    pub delay: Duration,
    pub max_retry: u32,
    /// Wait between broker retries.
    pub retry_delay: Duration,
}

impl TaskClass {
    fn options(&self, task_id: TaskId) -> QueueOptions {
        QueueOptions::new()
            .with_task_id(task_id)
            .with_max_retry(self.max_retry)
            .with_delay(self.delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSettings {
    pub invitation: TaskClass,
    pub reminder: TaskClass,
    pub reminder_email: TaskClass,
    /// How long before an event starts its reminder fires.
    pub reminder_lead: chrono::Duration,
    /// Base of the RSVP and join links in emails.
    pub public_url: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        let class = |retry_delay_secs| TaskClass {
            delay: Duration::ZERO,
            max_retry: 3,
            retry_delay: Duration::from_secs(retry_delay_secs),
        };
        Self {
            invitation: class(30),
            reminder: class(60),
            reminder_email: class(30),
            reminder_lead: chrono::Duration::seconds(EVENT_REMINDER_INTERVAL.as_secs() as i64),
            public_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

impl NotificationSettings {
    /// Broker retry delays for the three task classes. Other types use the
    /// default exponential backoff.
    pub fn retry_delays(&self) -> RetryDelays {
        RetryDelays::new(RetryPolicy::default())
            .fixed(TaskKind::InvitationEmail, self.invitation.retry_delay)
            .fixed(TaskKind::EventReminder, self.reminder.retry_delay)
            .fixed(TaskKind::EventReminderEmail, self.reminder_email.retry_delay)
    }
}

/// Per-recipient tally of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub enqueued: usize,
    pub failed: usize,
}

/// A reminder pre-task that was put on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledReminder {
    pub task_id: TaskId,
    pub trigger_at: DateTime<Utc>,
    pub delay: Duration,
}

/// What [`NotificationScheduler::on_event_created`] managed to schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventNotifications {
    pub invitations: Option<FanOut>,
    pub reminder: Option<ScheduledReminder>,
}

pub struct NotificationScheduler {
    client: QueueClient,
    users: Arc<dyn UserRepository>,
    events: Arc<dyn EventRepository>,
    clock: Arc<dyn Clock>,
    settings: NotificationSettings,
}

impl NotificationScheduler {
    pub fn new(
        client: QueueClient,
        users: Arc<dyn UserRepository>,
        events: Arc<dyn EventRepository>,
        clock: Arc<dyn Clock>,
        settings: NotificationSettings,
    ) -> Self {
        Self {
            client,
            users,
            events,
            clock,
            settings,
        }
    }

    pub fn client(&self) -> &QueueClient {
        &self.client
    }

    pub fn settings(&self) -> &NotificationSettings {
        &self.settings
    }

    /// One `invitation_email` task per existing user in `user_ids`.
    ///
    /// Users that do not exist are skipped. A failure of the lookup itself
    /// aborts and is returned; a failure to enqueue one invitation is logged
    /// and counted.
    pub async fn create_invitation_tasks(
        &self,
        user_ids: &[UserId],
        event: &Event,
    ) -> Result<FanOut, TaskError> {
        let users = match self.users.read_users_by_ids(user_ids).await {
            Ok(users) => users,
            Err(RepositoryError::NotFound(_)) => {
                tracing::warn!(event_id = %event.id, "no invited users found; skipping invitations");
                return Ok(FanOut::default());
            }
            Err(e) => {
                tracing::error!(event_id = %event.id, error = %e, "reading invited users failed");
                return Err(e.into());
            }
        };
        if users.len() < user_ids.len() {
            tracing::warn!(
                event_id = %event.id,
                requested = user_ids.len(),
                found = users.len(),
                "some invited users do not exist"
            );
        }

        let mut fan_out = FanOut::default();
        for user in &users {
            let payload = InvitationEmail(emails::invitation_email(
                user,
                event,
                &self.settings.public_url,
            ));
            let task_id = TaskId::for_user_event(TaskKind::InvitationEmail, user.id, event.id);
            let opts = self.settings.invitation.options(task_id);

            match self.enqueue_payload(TaskKind::InvitationEmail, &payload, opts).await {
                Ok(()) => {
                    fan_out.enqueued += 1;
                    tracing::info!(user_id = %user.id, event_id = %event.id, "invitation email task enqueued");
                }
                Err(e) => {
                    fan_out.failed += 1;
                    tracing::error!(
                        user_id = %user.id,
                        event_id = %event.id,
                        error = %e,
                        "enqueueing invitation email task failed"
                    );
                }
            }
        }
        Ok(fan_out)
    }

    /// Put the `event_reminder` pre-task on the broker, due `reminder_lead`
    /// before the event starts.
    ///
    /// Fails with [`TaskError::ReminderNotScheduled`] if that moment is not
    /// in the future; nothing is enqueued then.
    pub async fn create_event_reminder_task(
        &self,
        event: &Event,
    ) -> Result<ScheduledReminder, TaskError> {
        let now = self.clock.now();
        let Some(trigger_at) = event.start_time.checked_sub_signed(self.settings.reminder_lead)
        else {
            tracing::info!(
                event_id = %event.id,
                start_time = %event.start_time,
                "reminder time is out of range; not scheduling"
            );
            return Err(TaskError::ReminderNotScheduled {
                trigger_at: DateTime::<Utc>::MIN_UTC,
            });
        };
        if trigger_at <= now {
            tracing::info!(
                event_id = %event.id,
                %trigger_at,
                start_time = %event.start_time,
                "reminder time is in the past; not scheduling"
            );
            return Err(TaskError::ReminderNotScheduled { trigger_at });
        }
        let delay = (trigger_at - now)
            .to_std()
            .map_err(|_| TaskError::ReminderNotScheduled { trigger_at })?;

        let task_id = TaskId::for_event(TaskKind::EventReminder, event.id);
        let opts = QueueOptions::new()
            .with_task_id(task_id.clone())
            .with_max_retry(self.settings.reminder.max_retry)
            .with_delay(delay);
        self.enqueue_payload(TaskKind::EventReminder, &EventReminder(event.clone()), opts)
            .await?;

        tracing::info!(
            event_id = %event.id,
            %trigger_at,
            start_time = %event.start_time,
            delay_secs = delay.as_secs(),
            "event reminder scheduled"
        );
        Ok(ScheduledReminder {
            task_id,
            trigger_at,
            delay,
        })
    }

    /// One `event_reminder_email` task per accepted attendee of `event`.
    pub async fn create_reminder_email_tasks(&self, event: &Event) -> Result<FanOut, TaskError> {
        let attendees = match self.events.read_accepted_attendees(event.id).await {
            Ok(attendees) => attendees,
            Err(RepositoryError::NotFound(_)) => Vec::new(),
            Err(e) => {
                tracing::error!(event_id = %event.id, error = %e, "reading accepted attendees failed");
                return Err(e.into());
            }
        };

        let mut fan_out = FanOut::default();
        let accepted = attendees
            .iter()
            .filter(|a| a.status == RsvpStatus::Accepted);
        for attendee in accepted {
            let user = &attendee.user;
            let payload = ReminderEmail(emails::reminder_email(user, event, &self.settings.public_url));
            let task_id = TaskId::for_user_event(TaskKind::EventReminderEmail, user.id, event.id);
            let opts = self.settings.reminder_email.options(task_id);

            match self.enqueue_payload(TaskKind::EventReminderEmail, &payload, opts).await {
                Ok(()) => fan_out.enqueued += 1,
                Err(e) => {
                    fan_out.failed += 1;
                    tracing::error!(
                        user_id = %user.id,
                        event_id = %event.id,
                        error = %e,
                        "enqueueing event reminder email task failed"
                    );
                }
            }
        }

        if fan_out == FanOut::default() {
            tracing::info!(event_id = %event.id, "no accepted attendees; skipping reminder emails");
        } else {
            tracing::info!(
                event_id = %event.id,
                enqueued = fan_out.enqueued,
                failed = fan_out.failed,
                "event reminder email tasks created"
            );
        }
        Ok(fan_out)
    }

    /// Remove any previous instance of the task, then enqueue it.
    ///
    /// A duplicate reported by the broker means a concurrent caller already
    /// scheduled it: that is a success, returned as `None`.
    pub async fn enqueue_idempotent(
        &self,
        task: QueuedTask,
        opts: QueueOptions,
    ) -> Result<Option<TaskId>, TaskError> {
        if let Some(task_id) = &opts.task_id
            && let Err(e) = self.client.dequeue(task_id).await
        {
            tracing::warn!(task_id = %task_id, error = %e, "removing previous task instance failed");
        }

        match self.client.enqueue(task, &opts).await {
            Ok(task_id) => Ok(Some(task_id)),
            Err(e) if e.is_duplicate() => {
                tracing::warn!(
                    task_id = ?opts.task_id.as_ref().map(TaskId::as_str),
                    "duplicate task; already scheduled"
                );
                Ok(None)
            }
            Err(e) => {
                tracing::error!(
                    task_id = ?opts.task_id.as_ref().map(TaskId::as_str),
                    error = %e,
                    "enqueueing task failed"
                );
                Err(e)
            }
        }
    }

    /// Schedule everything a new event needs. Failures are logged, never
    /// returned: creating the event must not depend on them.
    pub async fn on_event_created(&self, event: &Event, invited: &[UserId]) -> EventNotifications {
        let mut scheduled = EventNotifications::default();

        if !invited.is_empty() {
            match self.create_invitation_tasks(invited, event).await {
                Ok(fan_out) => scheduled.invitations = Some(fan_out),
                Err(e) => {
                    tracing::error!(event_id = %event.id, error = %e, "scheduling invitations failed")
                }
            }
        }

        match self.create_event_reminder_task(event).await {
            Ok(reminder) => scheduled.reminder = Some(reminder),
            Err(e @ TaskError::ReminderNotScheduled { .. }) => {
                tracing::info!(event_id = %event.id, reason = %e, "event reminder skipped")
            }
            Err(e) => {
                tracing::error!(event_id = %event.id, error = %e, "scheduling event reminder failed")
            }
        }

        scheduled
    }

    async fn enqueue_payload<T: Serialize>(
        &self,
        kind: TaskKind,
        payload: &T,
        opts: QueueOptions,
    ) -> Result<(), TaskError> {
        let task = self.client.create_task(kind, payload)?;
        self.enqueue_idempotent(task, opts).await.map(|_| ())
    }
}
