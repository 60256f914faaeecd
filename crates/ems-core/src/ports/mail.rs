//! Outbound email port.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{EmailPayload, TaskError};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("error sending email to {to}: {source}")]
    Request {
        to: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("email service returned status code {status} for recipient {to}")]
    Status { status: u16, to: String },

    #[error("{0}")]
    Other(String),
}

impl From<MailError> for TaskError {
    fn from(err: MailError) -> Self {
        TaskError::Mail(err.to_string())
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send_email(&self, payload: &EmailPayload) -> Result<(), MailError>;
}
