//! Typed task payloads.
//!
//! Each wire type string is bound to exactly one payload type, so a handler
//! can never be registered for a payload it does not understand.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{EmailPayload, Event, TaskKind};

/// Binds a payload type to its wire type string.
///
/// # Trait Bounds
/// - `Serialize` / `DeserializeOwned`: payloads travel through the broker as JSON
/// - `Send + Sync + 'static`: handlers holding them are shared across workers
pub trait TaskPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}

/// Body of an `invitation_email` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvitationEmail(pub EmailPayload);

impl TaskPayload for InvitationEmail {
    const TYPE: &'static str = TaskKind::InvitationEmail.as_str();
}

/// Body of an `event_reminder` task: the event whose attendees get reminded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventReminder(pub Event);

impl TaskPayload for EventReminder {
    const TYPE: &'static str = TaskKind::EventReminder.as_str();
}

/// Body of an `event_reminder_email` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReminderEmail(pub EmailPayload);

impl TaskPayload for ReminderEmail {
    const TYPE: &'static str = TaskKind::EventReminderEmail.as_str();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_types_match_wire_names() {
        assert_eq!(InvitationEmail::TYPE, "invitation_email");
        assert_eq!(EventReminder::TYPE, "event_reminder");
        assert_eq!(ReminderEmail::TYPE, "event_reminder_email");
    }

    #[test]
    fn email_payload_is_not_wrapped_on_the_wire() {
        let payload = ReminderEmail(EmailPayload {
            mail_to: "a@example.com".into(),
            subject: "Event Reminder: Launch".into(),
            body: json!({"event_title": "Launch"}),
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["mail_to"], "a@example.com");
        assert_eq!(value["body"]["event_title"], "Launch");
    }
}
