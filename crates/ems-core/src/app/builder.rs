//! ServerBuilder: wiring and start-up validation of the dispatch server.

use std::sync::Arc;
use std::time::Duration;

use super::server::{Server, ServerConfig};
use crate::queue::{Broker, QueueWeight, RetryDelays};
use crate::typed::{Handler, RegistryError, Router, TaskPayload};

/// Builds a [`Server`].
///
/// ```ignore
/// let server = ServerBuilder::new(broker)
///     .register::<InvitationEmail, _>(SendInvitation::new(mail))?
///     .expect_tasks(&[InvitationEmail::TYPE])
///     .build()?;
/// ```
///
/// `build()` checks that every type passed to `expect_tasks` has a handler,
/// so a missing registration fails at start-up instead of leaving tasks to
/// die in the broker.
pub struct ServerBuilder {
    broker: Arc<dyn Broker>,
    router: Router,
    retry_delays: RetryDelays,
    config: ServerConfig,
    queues_set: bool,
    expected_tasks: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing task types: {0:?}; they were expected but have no handler")]
    MissingTaskTypes(Vec<String>),

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("janitor interval must be non-zero")]
    ZeroJanitorInterval,
}

impl ServerBuilder {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            router: Router::new(),
            retry_delays: RetryDelays::default(),
            config: ServerConfig::default(),
            queues_set: false,
            expected_tasks: None,
        }
    }

    pub fn register<T, H>(mut self, handler: H) -> Result<Self, RegistryError>
    where
        T: TaskPayload,
        H: Handler<T> + 'static,
    {
        self.router.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Serve `name` with the given weight. The first call replaces the
    /// default queue; later calls add to it.
    pub fn queue(mut self, name: impl Into<String>, weight: u32) -> Self {
        if !self.queues_set {
            self.config.queues.clear();
            self.queues_set = true;
        }
        self.config.queues.push(QueueWeight::new(name, weight));
        self
    }

    pub fn retry_delays(mut self, retry_delays: RetryDelays) -> Self {
        self.retry_delays = retry_delays;
        self
    }

    pub fn janitor_interval(mut self, interval: Duration) -> Self {
        self.config.janitor_interval = interval;
        self
    }

    pub fn build(self) -> Result<Server, BuildError> {
        if let Some(expected) = &self.expected_tasks {
            let registered = self.router.registered_types();
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !registered.contains(&t.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }
        if self.config.concurrency == 0 {
            return Err(BuildError::ZeroConcurrency);
        }
        if self.config.janitor_interval.is_zero() {
            return Err(BuildError::ZeroJanitorInterval);
        }
        Ok(Server::new(
            self.broker,
            self.router,
            self.retry_delays,
            self.config,
        ))
    }
}
