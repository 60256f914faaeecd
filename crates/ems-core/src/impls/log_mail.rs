use async_trait::async_trait;

use crate::domain::EmailPayload;
use crate::ports::{MailError, MailTransport};

/// Mail transport that only logs. Used when no mail service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailTransport;

#[async_trait]
impl MailTransport for LogMailTransport {
    async fn send_email(&self, payload: &EmailPayload) -> Result<(), MailError> {
        tracing::info!(
            mail_to = %payload.mail_to,
            subject = %payload.subject,
            "email not sent: no mail service configured"
        );
        Ok(())
    }
}
