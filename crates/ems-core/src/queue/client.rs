//! Client-side wrapper around a [`Broker`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::Broker;
use crate::domain::{EnqueueOptions, QueueOptions, QueuedTask, TaskError, TaskId, TaskType};

/// Values used where [`QueueOptions`] leaves a field unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDefaults {
    pub queue: String,
    pub retention: Duration,
}

impl Default for QueueDefaults {
    fn default() -> Self {
        Self {
            queue: "app".into(),
            retention: Duration::from_secs(168 * 60 * 60),
        }
    }
}

/// Creates, enqueues and removes tasks. Cheap to clone and safe to share.
#[derive(Clone)]
pub struct QueueClient {
    broker: Arc<dyn Broker>,
    defaults: QueueDefaults,
}

impl QueueClient {
    pub fn new(broker: Arc<dyn Broker>, defaults: QueueDefaults) -> Self {
        Self { broker, defaults }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Name of the queue tasks go to when no override is given.
    pub fn queue(&self) -> &str {
        &self.defaults.queue
    }

    /// Serialize `payload` as JSON and tag it with `task_type`.
    pub fn create_task<T>(
        &self,
        task_type: impl Into<TaskType>,
        payload: &T,
    ) -> Result<QueuedTask, TaskError>
    where
        T: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec(payload)?;
        Ok(QueuedTask::new(task_type, bytes))
    }

    /// Fill the gaps in `opts` from the defaults.
    pub fn resolve_options(&self, opts: &QueueOptions) -> EnqueueOptions {
        let queue = opts
            .queue
            .as_ref()
            .filter(|q| !q.is_empty())
            .cloned()
            .unwrap_or_else(|| self.defaults.queue.clone());
        let retention = if opts.retention.is_zero() {
            self.defaults.retention
        } else {
            opts.retention
        };
        EnqueueOptions {
            task_id: opts.task_id.clone().filter(|id| !id.is_empty()),
            queue,
            max_retry: opts.max_retry,
            retention,
            delay: (!opts.delay.is_zero()).then_some(opts.delay),
            uniqueness_window: (!opts.uniqueness_window.is_zero())
                .then_some(opts.uniqueness_window),
        }
    }

    /// Submit `task`. Returns the id the broker stored it under.
    pub async fn enqueue(&self, task: QueuedTask, opts: &QueueOptions) -> Result<TaskId, TaskError> {
        let resolved = self.resolve_options(opts);
        let task_type = task.task_type().clone();
        let info = self.broker.enqueue(task, resolved).await?;
        tracing::debug!(
            task_id = %info.id,
            task_type = %task_type,
            queue = %info.queue,
            state = ?info.state,
            "task enqueued"
        );
        Ok(info.id)
    }

    /// Remove `task_id` from the default queue.
    ///
    /// Absent tasks are a no-op. A running task is asked to cancel before it
    /// is deleted.
    pub async fn dequeue(&self, task_id: &TaskId) -> Result<(), TaskError> {
        let queue = self.defaults.queue.clone();
        self.dequeue_from(&queue, task_id).await
    }

    pub async fn dequeue_from(&self, queue: &str, task_id: &TaskId) -> Result<(), TaskError> {
        let info = match self.broker.get_task_info(queue, task_id).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        if info.state.is_active() {
            tracing::info!(task_id = %task_id, "cancelling running task before removal");
            self.broker.cancel_processing(task_id).await?;
        }

        match self.broker.delete_task(queue, task_id).await {
            Ok(()) => {
                tracing::debug!(task_id = %task_id, state = ?info.state, "task removed");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskKind, TaskState};
    use crate::queue::{InMemoryBroker, QueueWeight};

    fn client() -> QueueClient {
        QueueClient::new(Arc::new(InMemoryBroker::default()), QueueDefaults::default())
    }

    #[test]
    fn unset_options_take_defaults() {
        let c = client();
        let resolved = c.resolve_options(&QueueOptions::new());
        assert_eq!(
            resolved,
            EnqueueOptions {
                task_id: None,
                queue: "app".into(),
                max_retry: 0,
                retention: Duration::from_secs(168 * 3600),
                delay: None,
                uniqueness_window: None,
            }
        );
    }

    #[test]
    fn set_options_are_kept() {
        let c = client();
        let opts = QueueOptions::new()
            .with_task_id(TaskId::new("x"))
            .with_max_retry(3)
            .with_queue("critical")
            .with_retention(Duration::from_secs(60))
            .with_delay(Duration::from_secs(5))
            .with_uniqueness_window(Duration::from_secs(10));

        let resolved = c.resolve_options(&opts);
        assert_eq!(resolved.task_id, Some(TaskId::new("x")));
        assert_eq!(resolved.queue, "critical");
        assert_eq!(resolved.max_retry, 3);
        assert_eq!(resolved.retention, Duration::from_secs(60));
        assert_eq!(resolved.delay, Some(Duration::from_secs(5)));
        assert_eq!(resolved.uniqueness_window, Some(Duration::from_secs(10)));
    }

    #[test]
    fn empty_task_id_means_generated() {
        let c = client();
        let resolved = c.resolve_options(&QueueOptions::new().with_task_id(TaskId::new("")));
        assert_eq!(resolved.task_id, None);
    }

    #[test]
    fn create_task_encodes_json() {
        let task = client()
            .create_task(TaskKind::EventReminder, &serde_json::json!({"id": 4}))
            .unwrap();
        assert_eq!(task.task_type().as_str(), "event_reminder");
        assert_eq!(task.payload(), br#"{"id":4}"#);
    }

    #[tokio::test]
    async fn dequeue_of_absent_task_is_noop() {
        client().dequeue(&TaskId::new("nope")).await.unwrap();
    }

    #[tokio::test]
    async fn dequeue_removes_pending_task() {
        let c = client();
        let task = c.create_task(TaskKind::InvitationEmail, "hi").unwrap();
        let id = c
            .enqueue(task, &QueueOptions::new().with_task_id(TaskId::new("t")))
            .await
            .unwrap();

        c.dequeue(&id).await.unwrap();
        let counts = c.broker().counts_by_state("app").await.unwrap();
        assert_eq!(counts.live(), 0);
    }

    #[tokio::test]
    async fn dequeue_cancels_running_task() {
        let c = client();
        let task = c.create_task(TaskKind::InvitationEmail, "hi").unwrap();
        let id = c
            .enqueue(task, &QueueOptions::new().with_task_id(TaskId::new("t")))
            .await
            .unwrap();
        let lease = c.broker().lease(&[QueueWeight::new("app", 1)]).await.unwrap();
        assert_eq!(lease.info().state, TaskState::Active);
        let cancelled = lease.cancelled();

        c.dequeue(&id).await.unwrap();
        assert!(*cancelled.borrow());
        assert!(
            c.broker()
                .get_task_info("app", &id)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}
