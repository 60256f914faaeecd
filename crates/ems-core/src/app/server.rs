//! Dispatch server: leases due tasks from the broker and runs their handlers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::{TaskError, TaskState};
use crate::queue::{Broker, QueueWeight, RetryDelays, TaskLease};
use crate::typed::Router;
use crate::worker::Scheduler;

/// Pause after the broker fails to hand out a lease.
const LEASE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of tasks processed at the same time.
    pub concurrency: usize,
    pub queues: Vec<QueueWeight>,
    /// How often expired completed tasks are purged.
    pub janitor_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queues: vec![QueueWeight::new("app", 1)],
            janitor_interval: Duration::from_secs(60),
        }
    }
}

/// Everything a dispatch worker needs, shared by all of them.
struct Dispatch {
    broker: Arc<dyn Broker>,
    router: Router,
    retry_delays: RetryDelays,
    queues: Vec<QueueWeight>,
}

/// A validated, not yet running server. Built by
/// [`ServerBuilder`](super::ServerBuilder).
pub struct Server {
    dispatch: Arc<Dispatch>,
    concurrency: usize,
    janitor_interval: Duration,
}

impl Server {
    pub(super) fn new(
        broker: Arc<dyn Broker>,
        router: Router,
        retry_delays: RetryDelays,
        config: ServerConfig,
    ) -> Self {
        Self {
            dispatch: Arc::new(Dispatch {
                broker,
                router,
                retry_delays,
                queues: config.queues,
            }),
            concurrency: config.concurrency,
            janitor_interval: config.janitor_interval,
        }
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        self.dispatch.router.registered_types()
    }

    /// Spawn the dispatch workers and the retention janitor.
    pub fn start(self) -> ServerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            let dispatch = Arc::clone(&self.dispatch);
            let mut rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, dispatch, &mut rx).await;
            }));
        }

        let janitor = Scheduler::new(self.janitor_interval);
        let broker = Arc::clone(&self.dispatch.broker);
        janitor.start(move || {
            let broker = Arc::clone(&broker);
            async move {
                match broker.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => tracing::debug!(purged, "expired tasks purged"),
                    Err(e) => tracing::warn!(error = %e, "purging expired tasks failed"),
                }
            }
        });

        tracing::info!(
            concurrency = self.concurrency,
            queues = ?self.dispatch.queues,
            types = ?self.dispatch.router.registered_types(),
            "dispatch server started"
        );

        ServerHandle {
            shutdown_tx,
            joins,
            janitor,
        }
    }
}

/// Handle to a running [`Server`].
pub struct ServerHandle {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    janitor: Scheduler,
}

impl ServerHandle {
    /// Stop taking new leases. Handlers already running are not interrupted.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Request shutdown and wait for every worker to finish its current task.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.janitor.stop().await;
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "dispatch worker terminated abnormally");
            }
        }
        tracing::info!("dispatch server stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    dispatch: Arc<Dispatch>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            break;
        }

        // leasing may wait indefinitely, so race it against shutdown
        let lease = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            lease = dispatch.broker.lease(&dispatch.queues) => lease,
        };

        match lease {
            Ok(lease) => dispatch.process(worker_id, lease).await,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "leasing a task failed");
                tokio::time::sleep(LEASE_ERROR_BACKOFF).await;
            }
        }
    }
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // lease gone without a cancel: never resolve
        std::future::pending::<()>().await;
    }
}

impl Dispatch {
    async fn process(&self, worker_id: usize, lease: Box<dyn TaskLease>) {
        let info = lease.info().clone();
        let task_type = info.task.task_type().clone();
        let mut cancelled = lease.cancelled();

        let outcome = tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancelled) => None,
            result = AssertUnwindSafe(self.router.dispatch(&info.task)).catch_unwind() => {
                // a panicking handler counts as a failed attempt
                Some(result.unwrap_or_else(|_| {
                    Err(TaskError::HandlerExecution("handler panicked".into()))
                }))
            }
        };

        let reported = match outcome {
            None => {
                tracing::info!(worker_id, task_id = %info.id, task_type = %task_type, "task cancelled while running");
                lease.discard().await
            }
            Some(Ok(result)) => {
                tracing::info!(
                    worker_id,
                    task_id = %info.id,
                    task_type = %task_type,
                    result = result.as_deref().unwrap_or_default(),
                    "task completed"
                );
                lease.ack(result).await
            }
            Some(Err(err)) => {
                let delay = self.retry_delays.delay_for(info.retried, &err, &info.task);
                let message = err.to_string();
                match lease.fail(message.clone(), delay).await {
                    Ok(Some(TaskState::Dead)) => {
                        tracing::error!(
                            worker_id,
                            task_id = %info.id,
                            task_type = %task_type,
                            retried = info.retried,
                            error = %message,
                            "task failed and has no retries left"
                        );
                        Ok(())
                    }
                    Ok(Some(_)) => {
                        tracing::warn!(
                            worker_id,
                            task_id = %info.id,
                            task_type = %task_type,
                            retry_in = ?delay,
                            error = %message,
                            "task failed; retry scheduled"
                        );
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = reported {
            tracing::error!(worker_id, task_id = %info.id, error = %e, "reporting task outcome failed");
        }
    }
}
