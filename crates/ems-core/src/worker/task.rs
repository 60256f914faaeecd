//! Unit of work for the in-process pool.

use std::future::Future;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

/// Something the pool can run.
///
/// `execute` may be called up to `max_retries() + 1` times, always
/// sequentially on the same worker. `on_error` is called at most once, with
/// the error of the last attempt.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn execute(&self) -> anyhow::Result<()>;

    fn on_error(&self, err: anyhow::Error);

    fn max_retries(&self) -> u32;
}

type Action = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type ErrorHandler = Box<dyn Fn(anyhow::Error) + Send + Sync>;

/// Closure-backed [`Executor`].
pub struct Task {
    action: Action,
    error_handler: ErrorHandler,
    max_retries: u32,
}

impl Task {
    /// `action` is re-invoked for every attempt, so it must be able to build
    /// a fresh future each time.
    pub fn new<F, Fut, E>(action: F, error_handler: E, max_retries: u32) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
        E: Fn(anyhow::Error) + Send + Sync + 'static,
    {
        Self {
            action: Box::new(move || action().boxed()),
            error_handler: Box::new(error_handler),
            max_retries,
        }
    }
}

#[async_trait]
impl Executor for Task {
    async fn execute(&self) -> anyhow::Result<()> {
        (self.action)().await
    }

    fn on_error(&self, err: anyhow::Error) {
        (self.error_handler)(err)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
