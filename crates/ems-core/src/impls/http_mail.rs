//! HTTP mail transport: POSTs the payload as JSON to a mail service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::domain::EmailPayload;
use crate::ports::{MailError, MailTransport};

/// Idle connections kept per mail host.
const MAX_IDLE_CONNECTIONS: usize = 50;

#[derive(Debug, Clone)]
pub struct HttpMailTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpMailTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
            .build()
            .map_err(|e| MailError::Other(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    /// Anything but `200 OK` counts as a failed delivery.
    async fn send_email(&self, payload: &EmailPayload) -> Result<(), MailError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|source| MailError::Request {
                to: payload.mail_to.clone(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(MailError::Status {
                status: status.as_u16(),
                to: payload.mail_to.clone(),
            });
        }

        tracing::debug!(mail_to = %payload.mail_to, "email accepted by mail service");
        Ok(())
    }
}
