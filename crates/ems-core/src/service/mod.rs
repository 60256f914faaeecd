//! Notification services.
//!
//! - **NotificationScheduler**: decides which tasks to enqueue for an event
//!   and enqueues them idempotently
//! - **handlers**: what the dispatch server runs for each task type
//! - **MailService**: direct delivery through the worker pool

pub mod emails;
pub mod handlers;
pub mod mail;
pub mod notifications;

#[cfg(test)]
pub(crate) mod testing;

pub use self::handlers::{
    EventReminderHandler, InvitationEmailHandler, ReminderEmailHandler, server_builder,
};
pub use self::mail::MailService;
pub use self::notifications::{
    EventNotifications, FanOut, NotificationScheduler, NotificationSettings, ScheduledReminder,
    TaskClass,
};
