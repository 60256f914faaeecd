use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::task::{Executor, Task};

type SharedExecutor = Arc<dyn Executor>;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("invalid worker pool configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("worker pool queue is full")]
    Full,

    #[error("worker pool is stopped")]
    Stopped,

    #[error("worker pool did not drain within {0:?}")]
    DeadlineExceeded(Duration),
}

/// Fixed-size pool of workers draining a bounded task queue.
///
/// - `start()` spawns the workers once; later calls do nothing.
/// - `stop()` refuses new submissions, closes the queue, and waits until the
///   workers have drained what was already buffered. Running actions are
///   never cancelled.
/// - A failing task is retried on the same worker, waiting `n * backoff_unit`
///   before attempt `n + 1`.
pub struct WorkerPool {
    worker_count: usize,
    backoff_unit: Duration,
    sender: Mutex<Option<mpsc::Sender<SharedExecutor>>>,
    receiver: Mutex<Option<mpsc::Receiver<SharedExecutor>>>,
    quit_tx: watch::Sender<bool>,
    started: AtomicBool,
    stopped: AtomicBool,
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

    pub fn new(worker_count: usize, queue_capacity: usize) -> Result<Self, PoolError> {
        if worker_count == 0 {
            return Err(PoolError::InvalidConfig("worker count must be greater than zero"));
        }
        if queue_capacity == 0 {
            return Err(PoolError::InvalidConfig("queue capacity must be greater than zero"));
        }

        let (tx, rx) = mpsc::channel(queue_capacity);
        let (quit_tx, _) = watch::channel(false);

        Ok(Self {
            worker_count,
            backoff_unit: Self::DEFAULT_BACKOFF_UNIT,
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            quit_tx,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            joins: Mutex::new(Vec::with_capacity(worker_count)),
        })
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Spawn the workers. Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(rx) = lock(&self.receiver).take() else {
            return;
        };
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut joins = lock(&self.joins);
        for worker_id in 0..self.worker_count {
            let rx = Arc::clone(&rx);
            let backoff_unit = self.backoff_unit;
            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, backoff_unit).await;
            }));
        }
        tracing::info!(workers = self.worker_count, "worker pool started");
    }

    /// Submit a task, waiting for queue space if needed.
    ///
    /// Returns `false` if the pool is stopping and the task was dropped.
    pub async fn add_task(&self, task: impl Executor) -> bool {
        let Some(sender) = self.sender() else {
            tracing::debug!("worker pool stopped; task dropped");
            return false;
        };

        let mut quit = self.quit_tx.subscribe();
        if *quit.borrow_and_update() {
            return false;
        }

        tokio::select! {
            res = sender.send(Arc::new(task)) => res.is_ok(),
            _ = quit.changed() => {
                tracing::debug!("worker pool stopping; pending submission dropped");
                false
            }
        }
    }

    /// Non-blocking submission.
    pub fn try_add_task(&self, task: impl Executor) -> Result<(), PoolError> {
        if *self.quit_tx.borrow() {
            return Err(PoolError::Stopped);
        }
        let sender = self.sender().ok_or(PoolError::Stopped)?;
        sender.try_send(Arc::new(task)).map_err(|e| match e {
            TrySendError::Full(_) => PoolError::Full,
            TrySendError::Closed(_) => PoolError::Stopped,
        })
    }

    /// Run a best-effort side effect on the pool without retries.
    ///
    /// Failure is only logged; a full or stopped pool rejects the work.
    pub fn spawn_detached<F, Fut>(&self, name: &'static str, action: F) -> Result<(), PoolError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let task = Task::new(
            action,
            move |err| tracing::warn!(work = name, error = %err, "detached work failed"),
            0,
        );
        self.try_add_task(task).inspect_err(|err| {
            tracing::warn!(work = name, error = %err, "detached work rejected");
        })
    }

    /// Stop accepting work and wait for the workers to drain the queue.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // First refuse new submissions, then close the queue so workers
        // exit once the buffer is empty.
        self.quit_tx.send_replace(true);
        lock(&self.sender).take();

        let joins = std::mem::take(&mut *lock(&self.joins));
        for join in joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "worker terminated abnormally");
            }
        }
        tracing::info!("worker pool stopped");
    }

    /// Like [`stop`](Self::stop), but gives up waiting after `deadline`.
    /// Workers that are still draining keep running in the background.
    pub async fn stop_with_deadline(&self, deadline: Duration) -> Result<(), PoolError> {
        match tokio::time::timeout(deadline, self.stop()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!(?deadline, "worker pool stop deadline exceeded");
                Err(PoolError::DeadlineExceeded(deadline))
            }
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<SharedExecutor>> {
        lock(&self.sender).clone()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("backoff_unit", &self.backoff_unit)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<SharedExecutor>>>,
    backoff_unit: Duration,
) {
    tracing::debug!(worker_id, "worker started");
    loop {
        // the receiver lock is released before the task runs
        let task = { rx.lock().await.recv().await };
        let Some(task) = task else {
            break;
        };
        run_with_retries(worker_id, task, backoff_unit).await;
        tracing::debug!(worker_id, "worker finished task");
    }
    tracing::debug!(worker_id, "worker exiting; queue closed");
}

async fn run_with_retries(worker_id: usize, task: SharedExecutor, backoff_unit: Duration) {
    let max_retries = task.max_retries();
    let mut attempt: u32 = 0;

    loop {
        let err = match execute_attempt(&task).await {
            Ok(()) => return,
            Err(err) => err,
        };

        if attempt >= max_retries {
            report_failure(worker_id, &task, err);
            return;
        }

        attempt += 1;
        tracing::warn!(
            worker_id,
            attempt,
            max_retries,
            error = %err,
            "task failed; retrying"
        );
        tokio::time::sleep(backoff_unit * attempt).await;
    }
}

/// Runs one attempt on its own tokio task so a panicking action counts as a
/// failed attempt instead of taking the worker down.
async fn execute_attempt(task: &SharedExecutor) -> anyhow::Result<()> {
    let task = Arc::clone(task);
    match tokio::spawn(async move { task.execute().await }).await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => Err(anyhow::anyhow!("task panicked")),
        Err(join_err) => Err(anyhow::anyhow!("task aborted: {join_err}")),
    }
}

fn report_failure(worker_id: usize, task: &SharedExecutor, err: anyhow::Error) {
    let on_error = AssertUnwindSafe(|| task.on_error(err));
    if std::panic::catch_unwind(on_error).is_err() {
        tracing::error!(worker_id, "task error callback panicked");
    }
}
