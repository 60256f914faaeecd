//! In-memory broker.
//!
//! Holds every task in one map guarded by a tokio mutex. Ready and scheduled
//! queues carry keys only and are cleaned lazily: an entry whose record was
//! deleted or replaced is skipped when it reaches the front.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{Mutex, Notify, watch};
use tokio::time::Instant;

use super::{Broker, QueueWeight, TaskInfo, TaskLease, TaskRecord};
use crate::domain::{EnqueueOptions, QueueCounts, QueuedTask, TaskError, TaskId, TaskState};
use crate::ports::{IdGenerator, SystemClock, UlidGenerator};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TaskKey {
    queue: String,
    id: TaskId,
}

impl TaskKey {
    fn new(queue: &str, id: &TaskId) -> Self {
        Self {
            queue: queue.to_owned(),
            id: id.clone(),
        }
    }
}

/// Delayed or retrying task entry. Ordered so `BinaryHeap` pops the
/// earliest first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledTask {
    process_at: Instant,
    seq: u64,
    key: TaskKey,
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .process_at
            .cmp(&self.process_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A uniqueness lock and the record generation that took it.
#[derive(Debug, Clone, Copy)]
struct UniqueLock {
    expires_at: Instant,
    owner_seq: u64,
}

#[derive(Default)]
struct BrokerState {
    records: HashMap<TaskKey, TaskRecord>,

    /// Per-queue FIFO of `(id, seq)`.
    ready: HashMap<String, VecDeque<(TaskId, u64)>>,

    scheduled: BinaryHeap<ScheduledTask>,

    unique_locks: HashMap<String, UniqueLock>,

    next_seq: u64,
}

struct LeasedParts {
    key: TaskKey,
    seq: u64,
    info: TaskInfo,
    cancel_rx: watch::Receiver<bool>,
}

impl BrokerState {
    fn promote_due(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.process_at > now {
                break;
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            if let Some(record) = self.records.get_mut(&entry.key)
                && record.seq == entry.seq
                && matches!(record.state, TaskState::Scheduled | TaskState::Retry)
            {
                record.promote();
                self.ready
                    .entry(entry.key.queue)
                    .or_default()
                    .push_back((entry.key.id, entry.seq));
            }
        }
    }

    /// Whether `queue` has a leasable task at its front, dropping stale
    /// entries on the way.
    fn has_ready(&mut self, queue: &str) -> bool {
        let Some(ready) = self.ready.get_mut(queue) else {
            return false;
        };
        while let Some((id, seq)) = ready.front().map(|(id, seq)| (id.clone(), *seq)) {
            let key = TaskKey { queue: queue.to_owned(), id };
            match self.records.get(&key) {
                Some(r) if r.seq == seq && r.state == TaskState::Pending => return true,
                _ => {
                    ready.pop_front();
                }
            }
        }
        false
    }

    /// Weighted random choice among `queues` that have ready tasks.
    fn pick_queue(&mut self, queues: &[QueueWeight]) -> Option<String> {
        let candidates: Vec<&QueueWeight> =
            queues.iter().filter(|q| self.has_ready(&q.name)).collect();
        let total: u64 = candidates.iter().map(|q| u64::from(q.weight.max(1))).sum();
        if total == 0 {
            return None;
        }

        let mut roll = rand::thread_rng().gen_range(0..total);
        for q in candidates {
            let weight = u64::from(q.weight.max(1));
            if roll < weight {
                return Some(q.name.clone());
            }
            roll -= weight;
        }
        None
    }

    fn lease_ready(&mut self, queues: &[QueueWeight]) -> Option<LeasedParts> {
        let queue = self.pick_queue(queues)?;
        let (id, seq) = self.ready.get_mut(&queue)?.pop_front()?;
        let key = TaskKey { queue, id };
        let record = self.records.get_mut(&key)?;
        let cancel_rx = record.start_attempt();
        Some(LeasedParts {
            info: record.info(),
            key,
            seq,
            cancel_rx,
        })
    }

    /// Drop the lock on `unique_key` if the record with `seq` still owns it.
    /// A lock that expired and was taken by a newer task stays.
    fn release_unique(&mut self, unique_key: Option<String>, seq: u64) {
        if let Some(k) = unique_key
            && self.unique_locks.get(&k).is_some_and(|lock| lock.owner_seq == seq)
        {
            self.unique_locks.remove(&k);
        }
    }
}

fn active_record<'a>(
    records: &'a mut HashMap<TaskKey, TaskRecord>,
    key: &TaskKey,
    seq: u64,
) -> Option<&'a mut TaskRecord> {
    records
        .get_mut(key)
        .filter(|r| r.seq == seq && r.state == TaskState::Active)
}

/// Uniqueness is judged on queue, type and payload bytes.
fn unique_key(queue: &str, task: &QueuedTask) -> String {
    let mut hasher = DefaultHasher::new();
    task.payload().hash(&mut hasher);
    format!("{queue}:{}:{:016x}", task.task_type(), hasher.finish())
}

/// Broker that keeps everything in process memory.
///
/// Nothing survives a restart; it stands in for a persistent broker in tests
/// and in the demo binary.
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    ids: Arc<dyn IdGenerator>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(UlidGenerator::new(SystemClock))
    }
}

impl InMemoryBroker {
    pub fn new(ids: impl IdGenerator + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            notify: Arc::new(Notify::new()),
            ids: Arc::new(ids),
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(
        &self,
        task: QueuedTask,
        opts: EnqueueOptions,
    ) -> Result<TaskInfo, TaskError> {
        let now = Instant::now();
        let info = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let id = opts
                .task_id
                .clone()
                .unwrap_or_else(|| self.ids.generate_task_id());
            let key = TaskKey::new(&opts.queue, &id);
            if state.records.contains_key(&key) {
                return Err(TaskError::duplicate(&id));
            }

            let seq = state.next_seq + 1;
            let unique = match opts.uniqueness_window {
                Some(window) if !window.is_zero() => {
                    let ukey = unique_key(&opts.queue, &task);
                    if state
                        .unique_locks
                        .get(&ukey)
                        .is_some_and(|lock| lock.expires_at > now)
                    {
                        return Err(TaskError::DuplicateTask(format!(
                            "{id} (unique key {ukey} is locked)"
                        )));
                    }
                    state.unique_locks.insert(
                        ukey.clone(),
                        UniqueLock {
                            expires_at: now + window,
                            owner_seq: seq,
                        },
                    );
                    Some(ukey)
                }
                _ => None,
            };
            state.next_seq = seq;
            let mut record = TaskRecord::new(
                id.clone(),
                opts.queue.clone(),
                task,
                seq,
                opts.max_retry,
                opts.retention,
                opts.delay,
            );
            record.unique_key = unique;

            if record.state == TaskState::Scheduled {
                state.scheduled.push(ScheduledTask {
                    process_at: record.process_at,
                    seq,
                    key: key.clone(),
                });
            } else {
                state
                    .ready
                    .entry(opts.queue.clone())
                    .or_default()
                    .push_back((id, seq));
            }
            let info = record.info();
            state.records.insert(key, record);
            info
        };

        self.notify.notify_waiters();
        Ok(info)
    }

    async fn lease(&self, queues: &[QueueWeight]) -> Result<Box<dyn TaskLease>, TaskError> {
        if queues.is_empty() {
            return Err(TaskError::Broker("no queues to lease from".into()));
        }
        loop {
            // registered before the state check, so an enqueue in between
            // still wakes this waiter
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_wake = {
                let mut state = self.state.lock().await;
                state.promote_due(Instant::now());

                if let Some(parts) = state.lease_ready(queues) {
                    return Ok(Box::new(InMemoryLease {
                        key: parts.key,
                        seq: parts.seq,
                        info: parts.info,
                        cancel_rx: parts.cancel_rx,
                        state: Arc::clone(&self.state),
                        notify: Arc::clone(&self.notify),
                    }));
                }

                state.scheduled.peek().map(|entry| entry.process_at)
            };

            match next_wake {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(at) => {},
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn get_task_info(&self, queue: &str, id: &TaskId) -> Result<TaskInfo, TaskError> {
        let state = self.state.lock().await;
        state
            .records
            .get(&TaskKey::new(queue, id))
            .map(TaskRecord::info)
            .ok_or_else(|| TaskError::task_not_found(id))
    }

    async fn delete_task(&self, queue: &str, id: &TaskId) -> Result<(), TaskError> {
        let mut state = self.state.lock().await;
        let key = TaskKey::new(queue, id);
        let Some(record) = state.records.get(&key) else {
            return Err(TaskError::task_not_found(id));
        };
        if record.state.is_active() && !record.cancel_requested {
            return Err(TaskError::Broker(format!(
                "task {id} is active; cancel processing before deleting it"
            )));
        }
        if let Some(record) = state.records.remove(&key) {
            state.release_unique(record.unique_key, record.seq);
        }
        Ok(())
    }

    async fn cancel_processing(&self, id: &TaskId) -> Result<(), TaskError> {
        let mut state = self.state.lock().await;
        state
            .records
            .values_mut()
            .filter(|r| &r.id == id && r.state.is_active())
            .for_each(TaskRecord::request_cancel);
        Ok(())
    }

    async fn counts_by_state(&self, queue: &str) -> Result<QueueCounts, TaskError> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        state
            .records
            .values()
            .filter(|r| r.queue == queue)
            .for_each(|r| counts.record(r.state));
        Ok(counts)
    }

    async fn purge_expired(&self) -> Result<usize, TaskError> {
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let before = state.records.len();
        state.records.retain(|_, r| !r.is_expired(now));
        state.unique_locks.retain(|_, lock| lock.expires_at > now);
        Ok(before - state.records.len())
    }
}

struct InMemoryLease {
    key: TaskKey,
    seq: u64,
    info: TaskInfo,
    cancel_rx: watch::Receiver<bool>,
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

#[async_trait]
impl TaskLease for InMemoryLease {
    fn info(&self) -> &TaskInfo {
        &self.info
    }

    fn cancelled(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }

    async fn ack(self: Box<Self>, result: Option<String>) -> Result<(), TaskError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(record) = active_record(&mut state.records, &self.key, self.seq) else {
            return Ok(());
        };

        let unique = record.unique_key.take();
        if record.retention.is_zero() {
            state.records.remove(&self.key);
        } else {
            record.mark_completed(result, Instant::now());
        }
        state.release_unique(unique, self.seq);
        Ok(())
    }

    async fn fail(
        self: Box<Self>,
        error: String,
        retry_delay: Duration,
    ) -> Result<Option<TaskState>, TaskError> {
        let outcome = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let Some(record) = active_record(&mut state.records, &self.key, self.seq) else {
                return Ok(None);
            };

            if record.retries_exhausted() {
                record.mark_dead(error);
                let unique = record.unique_key.take();
                state.release_unique(unique, self.seq);
                TaskState::Dead
            } else {
                let process_at = Instant::now() + retry_delay;
                record.schedule_retry(process_at, error);
                state.scheduled.push(ScheduledTask {
                    process_at,
                    seq: self.seq,
                    key: self.key.clone(),
                });
                TaskState::Retry
            }
        };

        if outcome == TaskState::Retry {
            self.notify.notify_waiters();
        }
        Ok(Some(outcome))
    }

    async fn discard(self: Box<Self>) -> Result<(), TaskError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if active_record(&mut state.records, &self.key, self.seq).is_some()
            && let Some(record) = state.records.remove(&self.key)
        {
            state.release_unique(record.unique_key, record.seq);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskKind;

    const QUEUE: &str = "app";

    fn opts() -> EnqueueOptions {
        EnqueueOptions {
            task_id: None,
            queue: QUEUE.into(),
            max_retry: 0,
            retention: Duration::ZERO,
            delay: None,
            uniqueness_window: None,
        }
    }

    fn task(payload: &str) -> QueuedTask {
        QueuedTask::new(TaskKind::InvitationEmail, payload.as_bytes().to_vec())
    }

    fn queues() -> Vec<QueueWeight> {
        vec![QueueWeight::new(QUEUE, 1)]
    }

    #[tokio::test]
    async fn enqueue_and_counts() {
        let broker = InMemoryBroker::default();
        broker.enqueue(task("{}"), opts()).await.unwrap();

        let counts = broker.counts_by_state(QUEUE).await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.active, 0);
    }

    #[tokio::test]
    async fn generated_ids_are_assigned() {
        let broker = InMemoryBroker::default();
        let a = broker.enqueue(task("{}"), opts()).await.unwrap();
        let b = broker.enqueue(task("{}"), opts()).await.unwrap();
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn lease_then_ack_keeps_result_until_retention() {
        let broker = InMemoryBroker::default();
        let mut o = opts();
        o.task_id = Some(TaskId::new("t1"));
        o.retention = Duration::from_secs(3600);
        broker.enqueue(task("{}"), o).await.unwrap();

        let lease = broker.lease(&queues()).await.unwrap();
        assert_eq!(lease.info().id.as_str(), "t1");
        assert_eq!(broker.counts_by_state(QUEUE).await.unwrap().active, 1);

        lease.ack(Some("done".into())).await.unwrap();
        let info = broker.get_task_info(QUEUE, &TaskId::new("t1")).await.unwrap();
        assert_eq!(info.state, TaskState::Completed);
        assert_eq!(info.result.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn zero_retention_drops_task_on_success() {
        let broker = InMemoryBroker::default();
        let info = broker.enqueue(task("{}"), opts()).await.unwrap();

        broker.lease(&queues()).await.unwrap().ack(None).await.unwrap();

        let err = broker.get_task_info(QUEUE, &info.id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_task_is_not_leased_early() {
        let broker = InMemoryBroker::default();
        let mut o = opts();
        o.delay = Some(Duration::from_secs(60));
        let info = broker.enqueue(task("{}"), o).await.unwrap();
        assert_eq!(info.state, TaskState::Scheduled);

        let early = tokio::time::timeout(Duration::from_secs(59), broker.lease(&queues())).await;
        assert!(early.is_err());

        let lease = tokio::time::timeout(Duration::from_secs(2), broker.lease(&queues()))
            .await
            .expect("task due by now")
            .unwrap();
        assert_eq!(lease.info().id, info.id);
    }

    #[tokio::test]
    async fn explicit_id_conflict_is_duplicate() {
        let broker = InMemoryBroker::default();
        let mut o = opts();
        o.task_id = Some(TaskId::new("same"));
        broker.enqueue(task("{}"), o.clone()).await.unwrap();

        let err = broker.enqueue(task("{}"), o).await.unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test(start_paused = true)]
    async fn uniqueness_window_rejects_equivalent_tasks() {
        let broker = InMemoryBroker::default();
        let mut o = opts();
        o.uniqueness_window = Some(Duration::from_secs(60));

        broker.enqueue(task(r#"{"a":1}"#), o.clone()).await.unwrap();
        let err = broker
            .enqueue(task(r#"{"a":1}"#), o.clone())
            .await
            .unwrap_err();
        assert!(err.is_duplicate());

        // different payload, different key
        broker.enqueue(task(r#"{"a":2}"#), o.clone()).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        broker.enqueue(task(r#"{"a":1}"#), o).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn finishing_task_keeps_a_newer_uniqueness_lock() {
        let broker = InMemoryBroker::default();
        let mut o = opts();
        o.uniqueness_window = Some(Duration::from_secs(60));

        broker.enqueue(task("same"), o.clone()).await.unwrap();
        let first = broker.lease(&queues()).await.unwrap();

        // the first lock expires while its task is still running
        tokio::time::advance(Duration::from_secs(61)).await;
        broker.enqueue(task("same"), o.clone()).await.unwrap();
        first.ack(None).await.unwrap();

        let err = broker.enqueue(task("same"), o.clone()).await.unwrap_err();
        assert!(err.is_duplicate());

        // the second task dying releases its own lock
        let second = broker.lease(&queues()).await.unwrap();
        let state = second.fail("boom".into(), Duration::ZERO).await.unwrap();
        assert_eq!(state, Some(TaskState::Dead));
        broker.enqueue(task("same"), o).await.unwrap();
    }

    #[tokio::test]
    async fn enqueue_burst_wakes_every_idle_lease() {
        let broker = Arc::new(InMemoryBroker::default());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let broker = Arc::clone(&broker);
                tokio::spawn(async move { broker.lease(&queues()).await.map(|l| l.info().id.clone()) })
            })
            .collect();
        tokio::task::yield_now().await;

        for n in 0..3 {
            broker.enqueue(task(&n.to_string()), opts()).await.unwrap();
        }

        let mut leased = Vec::new();
        for waiter in waiters {
            let id = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("idle lease was not woken")
                .unwrap()
                .unwrap();
            leased.push(id);
        }
        leased.sort();
        leased.dedup();
        assert_eq!(leased.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_retry_then_die() {
        let broker = InMemoryBroker::default();
        let mut o = opts();
        o.max_retry = 1;
        broker.enqueue(task("{}"), o).await.unwrap();

        let lease = broker.lease(&queues()).await.unwrap();
        let state = lease
            .fail("boom".into(), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(state, Some(TaskState::Retry));
        assert_eq!(broker.counts_by_state(QUEUE).await.unwrap().retry, 1);

        let started = Instant::now();
        let lease = broker.lease(&queues()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(lease.info().retried, 1);
        assert_eq!(lease.info().last_error.as_deref(), Some("boom"));

        let state = lease
            .fail("boom again".into(), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(state, Some(TaskState::Dead));
        let counts = broker.counts_by_state(QUEUE).await.unwrap();
        assert_eq!(counts.dead, 1);
        assert_eq!(counts.live(), 0);
    }

    #[tokio::test]
    async fn active_task_needs_cancel_before_delete() {
        let broker = InMemoryBroker::default();
        let mut o = opts();
        o.task_id = Some(TaskId::new("busy"));
        broker.enqueue(task("{}"), o.clone()).await.unwrap();
        let lease = broker.lease(&queues()).await.unwrap();
        let cancelled = lease.cancelled();
        let id = TaskId::new("busy");

        assert!(broker.delete_task(QUEUE, &id).await.is_err());

        broker.cancel_processing(&id).await.unwrap();
        assert!(*cancelled.borrow());
        broker.delete_task(QUEUE, &id).await.unwrap();

        // a replacement with the same id is not touched by the old lease
        broker.enqueue(task("{}"), o).await.unwrap();
        lease.ack(None).await.unwrap();
        let info = broker.get_task_info(QUEUE, &id).await.unwrap();
        assert_eq!(info.state, TaskState::Pending);
    }

    #[tokio::test]
    async fn discarded_lease_is_gone() {
        let broker = InMemoryBroker::default();
        let info = broker.enqueue(task("{}"), opts()).await.unwrap();
        broker.lease(&queues()).await.unwrap().discard().await.unwrap();
        assert!(
            broker
                .get_task_info(QUEUE, &info.id)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn lease_only_from_requested_queues() {
        let broker = InMemoryBroker::default();
        let mut low = opts();
        low.queue = "low".into();
        broker.enqueue(task("low"), low).await.unwrap();
        let wanted = broker.enqueue(task("app"), opts()).await.unwrap();

        let lease = broker.lease(&queues()).await.unwrap();
        assert_eq!(lease.info().id, wanted.id);
        assert_eq!(broker.counts_by_state("low").await.unwrap().pending, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_expired_completed_tasks() {
        let broker = InMemoryBroker::default();
        let mut o = opts();
        o.retention = Duration::from_secs(3600);
        broker.enqueue(task("{}"), o).await.unwrap();
        broker.lease(&queues()).await.unwrap().ack(None).await.unwrap();

        assert_eq!(broker.purge_expired().await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(3601)).await;
        assert_eq!(broker.purge_expired().await.unwrap(), 1);
        assert_eq!(broker.counts_by_state(QUEUE).await.unwrap().completed, 0);
    }
}
