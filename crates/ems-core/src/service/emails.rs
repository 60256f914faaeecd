//! Email contents.

use serde_json::json;

use crate::domain::{EmailPayload, Event, EventId, User};

/// `{public_url}/v1/events/{id}/rsvp`
pub fn rsvp_link(public_url: &str, event: EventId) -> String {
    format!(
        "{}/v1/events/{}/rsvp",
        public_url.trim_end_matches('/'),
        event.get()
    )
}

/// `{public_url}/v1/events/{id}/join`
pub fn join_link(public_url: &str, event: EventId) -> String {
    format!(
        "{}/v1/events/{}/join",
        public_url.trim_end_matches('/'),
        event.get()
    )
}

pub fn invitation_email(user: &User, event: &Event, public_url: &str) -> EmailPayload {
    EmailPayload {
        mail_to: user.email.clone(),
        subject: format!("Invitation to Event: {}", event.title),
        body: json!({
            "event": event,
            "rsvp_link": rsvp_link(public_url, event.id),
        }),
    }
}

pub fn reminder_email(user: &User, event: &Event, public_url: &str) -> EmailPayload {
    EmailPayload {
        mail_to: user.email.clone(),
        subject: format!("Event Reminder: {}", event.title),
        body: json!({
            "event_title": event.title,
            "start_time": event.start_time,
            "join_link": join_link(public_url, event.id),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{event_starting_at, user};
    use chrono::{TimeZone, Utc};

    #[test]
    fn invitation_carries_event_and_rsvp_link() {
        let event = event_starting_at(9, Utc.with_ymd_and_hms(2030, 5, 1, 18, 0, 0).unwrap());
        let email = invitation_email(&user(4), &event, "http://ems.local/");

        assert_eq!(email.mail_to, "u4@example.com");
        assert_eq!(email.subject, "Invitation to Event: Event 9");
        assert_eq!(email.body["rsvp_link"], "http://ems.local/v1/events/9/rsvp");
        assert_eq!(email.body["event"]["title"], "Event 9");
    }

    #[test]
    fn reminder_carries_title_start_and_join_link() {
        let start = Utc.with_ymd_and_hms(2030, 5, 1, 18, 0, 0).unwrap();
        let email = reminder_email(&user(4), &event_starting_at(9, start), "http://ems.local");

        assert_eq!(email.subject, "Event Reminder: Event 9");
        assert_eq!(email.body["event_title"], "Event 9");
        assert_eq!(email.body["start_time"], "2030-05-01T18:00:00Z");
        assert_eq!(email.body["join_link"], "http://ems.local/v1/events/9/join");
    }
}
