use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::EVENT_REMINDER_INTERVAL;
use crate::queue::QueueDefaults;
use crate::service::{NotificationSettings, TaskClass};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub broker: BrokerConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub number_of_workers: usize,
    pub worker_queue_capacity: usize,
    /// Pool retry n waits n times this long.
    pub worker_backoff_ms: u64,
    /// Base of links put into emails.
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub concurrency: usize,
    pub queue: String,
    pub retention_hours: u64,
    pub invitation_email: TaskClassConfig,
    pub event_reminder: TaskClassConfig,
    pub event_reminder_email: TaskClassConfig,
    pub reminder_lead_minutes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TaskClassConfig {
    pub delay_secs: u64,
    pub retry_count: u32,
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Endpoint of the mail service. Unset means emails are only logged.
    pub url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            app: AppConfig {
                number_of_workers: 5,
                worker_queue_capacity: 10,
                worker_backoff_ms: 1000,
                public_url: "http://127.0.0.1:8080".to_string(),
            },
            broker: BrokerConfig {
                concurrency: 10,
                queue: "app".to_string(),
                retention_hours: 168,
                invitation_email: TaskClassConfig {
                    delay_secs: 0,
                    retry_count: 3,
                    retry_delay_secs: 30,
                },
                event_reminder: TaskClassConfig {
                    delay_secs: 0,
                    retry_count: 3,
                    retry_delay_secs: 60,
                },
                event_reminder_email: TaskClassConfig {
                    delay_secs: 0,
                    retry_count: 3,
                    retry_delay_secs: 30,
                },
                reminder_lead_minutes: EVENT_REMINDER_INTERVAL.as_secs() / 60,
            },
            email: EmailConfig {
                url: None,
                timeout_secs: 10,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Config::default();
        let var = |key: &str, default: String| lookup(key).unwrap_or(default);

        let number_of_workers = parse(&lookup, "APP_NUMBER_OF_WORKERS", d.app.number_of_workers)?;
        let app = AppConfig {
            number_of_workers,
            worker_queue_capacity: parse(
                &lookup,
                "APP_WORKER_QUEUE_CAPACITY",
                number_of_workers * 2,
            )?,
            worker_backoff_ms: parse(&lookup, "APP_WORKER_BACKOFF_MS", d.app.worker_backoff_ms)?,
            public_url: var("APP_PUBLIC_URL", d.app.public_url),
        };

        let broker = BrokerConfig {
            concurrency: parse(&lookup, "ASYNQ_CONCURRENCY", d.broker.concurrency)?,
            queue: var("ASYNQ_QUEUE", d.broker.queue),
            retention_hours: parse(&lookup, "ASYNQ_RETENTION_HOURS", d.broker.retention_hours)?,
            invitation_email: task_class(
                &lookup,
                "ASYNQ_INVITATION_EMAIL",
                d.broker.invitation_email,
            )?,
            event_reminder: task_class(&lookup, "ASYNQ_EVENT_REMINDER", d.broker.event_reminder)?,
            event_reminder_email: task_class(
                &lookup,
                "ASYNQ_EVENT_REMINDER_EMAIL",
                d.broker.event_reminder_email,
            )?,
            reminder_lead_minutes: parse(
                &lookup,
                "EVENT_REMINDER_LEAD_MINUTES",
                d.broker.reminder_lead_minutes,
            )?,
        };

        if reminder_lead(broker.reminder_lead_minutes).is_none() {
            return Err(ConfigError::InvalidValue(
                "EVENT_REMINDER_LEAD_MINUTES".to_string(),
            ));
        }

        let email = EmailConfig {
            url: lookup("EMAIL_URL").filter(|u| !u.is_empty()),
            timeout_secs: parse(&lookup, "EMAIL_TIMEOUT_SECS", d.email.timeout_secs)?,
        };

        Ok(Config { app, broker, email })
    }

    pub fn queue_defaults(&self) -> QueueDefaults {
        QueueDefaults {
            queue: self.broker.queue.clone(),
            retention: Duration::from_secs(self.broker.retention_hours.saturating_mul(60 * 60)),
        }
    }

    pub fn notification_settings(&self) -> NotificationSettings {
        NotificationSettings {
            invitation: self.broker.invitation_email.into(),
            reminder: self.broker.event_reminder.into(),
            reminder_email: self.broker.event_reminder_email.into(),
            reminder_lead: reminder_lead(self.broker.reminder_lead_minutes)
                .unwrap_or(chrono::Duration::MAX),
            public_url: self.app.public_url.clone(),
        }
    }

    pub fn worker_backoff(&self) -> Duration {
        Duration::from_millis(self.app.worker_backoff_ms)
    }

    pub fn email_timeout(&self) -> Duration {
        Duration::from_secs(self.email.timeout_secs)
    }
}

impl From<TaskClassConfig> for TaskClass {
    fn from(c: TaskClassConfig) -> Self {
        TaskClass {
            delay: Duration::from_secs(c.delay_secs),
            max_retry: c.retry_count,
            retry_delay: Duration::from_secs(c.retry_delay_secs),
        }
    }
}

/// Longest accepted reminder lead: one year.
const MAX_REMINDER_LEAD_MINUTES: u64 = 366 * 24 * 60;

fn reminder_lead(minutes: u64) -> Option<chrono::Duration> {
    if minutes > MAX_REMINDER_LEAD_MINUTES {
        return None;
    }
    chrono::Duration::try_minutes(i64::try_from(minutes).ok()?)
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn task_class<F>(
    lookup: &F,
    prefix: &str,
    default: TaskClassConfig,
) -> Result<TaskClassConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(TaskClassConfig {
        delay_secs: parse(lookup, &format!("{prefix}_DELAY_SECS"), default.delay_secs)?,
        retry_count: parse(lookup, &format!("{prefix}_RETRY_COUNT"), default.retry_count)?,
        retry_delay_secs: parse(
            lookup,
            &format!("{prefix}_RETRY_DELAY_SECS"),
            default.retry_delay_secs,
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.app.number_of_workers, 5);
        assert_eq!(config.app.worker_queue_capacity, 10);
        assert_eq!(config.broker.queue, "app");
        assert_eq!(config.broker.concurrency, 10);
        assert_eq!(config.broker.reminder_lead_minutes, 10);
        assert_eq!(config.email.url, None);

        let defaults = config.queue_defaults();
        assert_eq!(defaults.retention, Duration::from_secs(168 * 3600));
    }

    #[test]
    fn capacity_follows_worker_count() {
        let config = from_pairs(&[("APP_NUMBER_OF_WORKERS", "8")]).unwrap();
        assert_eq!(config.app.worker_queue_capacity, 16);
    }

    #[test]
    fn task_class_overrides() {
        let config = from_pairs(&[
            ("ASYNQ_EVENT_REMINDER_EMAIL_DELAY_SECS", "15"),
            ("ASYNQ_EVENT_REMINDER_EMAIL_RETRY_COUNT", "7"),
        ])
        .unwrap();
        let settings = config.notification_settings();
        assert_eq!(settings.reminder_email.delay, Duration::from_secs(15));
        assert_eq!(settings.reminder_email.max_retry, 7);
        assert_eq!(settings.reminder_email.retry_delay, Duration::from_secs(30));
        assert_eq!(settings.reminder_lead, chrono::Duration::minutes(10));
    }

    #[test]
    fn malformed_value_names_the_key() {
        let err = from_pairs(&[("ASYNQ_CONCURRENCY", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(k) if k == "ASYNQ_CONCURRENCY"));
    }

    #[test]
    fn reminder_lead_is_bounded() {
        let config = from_pairs(&[("EVENT_REMINDER_LEAD_MINUTES", "527040")]).unwrap();
        assert_eq!(config.notification_settings().reminder_lead, chrono::Duration::days(366));

        let err = from_pairs(&[("EVENT_REMINDER_LEAD_MINUTES", "18446744073709551615")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(k) if k == "EVENT_REMINDER_LEAD_MINUTES"));
    }

    #[test]
    fn empty_email_url_means_unset() {
        let config = from_pairs(&[("EMAIL_URL", "")]).unwrap();
        assert!(config.email.url.is_none());
    }
}
