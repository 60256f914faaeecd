//! Timers: a recurring [`Scheduler`] and a single-shot [`OneShot`].
//!
//! "Wait until T, then fire once" is a `OneShot`. Using a ticker for it and
//! stopping the ticker after a sleep of the same length races the second
//! tick.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Fires a callback every `interval` until stopped.
pub struct Scheduler {
    interval: Duration,
    stop_tx: Arc<watch::Sender<bool>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Signals a [`Scheduler`] to stop without waiting for it.
///
/// This is what a callback uses to stop its own scheduler: awaiting
/// [`Scheduler::stop`] from inside the callback would wait on itself.
#[derive(Clone)]
pub struct StopHandle {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn signal(&self) {
        self.stop_tx.send_replace(true);
    }
}

impl Scheduler {
    /// # Panics
    /// Panics if `interval` is zero.
    pub fn new(interval: Duration) -> Self {
        assert!(!interval.is_zero(), "scheduler interval must be non-zero");
        let (stop_tx, _) = watch::channel(false);
        Self {
            interval,
            stop_tx: Arc::new(stop_tx),
            handle: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking. The first call fires after one full interval.
    /// Calling `start` on a running scheduler does nothing.
    pub fn start<F, Fut>(&self, mut callback: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.is_some() {
            return;
        }

        let interval = self.interval;
        let mut stop_rx = self.stop_tx.subscribe();
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                if *stop_rx.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    biased;
                    // also fires once every sender is gone
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => callback().await,
                }
            }
        }));
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_tx: Arc::clone(&self.stop_tx),
        }
    }

    /// Stop ticking. Once this returns no further callback runs; a callback
    /// already in progress is awaited.
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "scheduler loop terminated abnormally");
        }
    }
}

/// Runs an action once after a delay unless cancelled first.
///
/// Dropping the `OneShot` cancels it.
pub struct OneShot {
    cancel_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<bool>,
}

impl OneShot {
    pub fn schedule<Fut>(delay: Duration, action: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = &mut cancel_rx => false,
                _ = tokio::time::sleep(delay) => {
                    action.await;
                    true
                }
            }
        });
        Self {
            cancel_tx: Some(cancel_tx),
            handle,
        }
    }

    /// Cancel the action. Returns `true` if it had not started yet; an
    /// action that already started is awaited and `false` is returned.
    pub async fn cancel(self) -> bool {
        let Self { cancel_tx, handle } = self;
        if let Some(tx) = cancel_tx {
            let _ = tx.send(());
        }
        !handle.await.unwrap_or(false)
    }

    /// Wait for the delay to elapse. Returns `true` if the action ran.
    pub async fn wait(self) -> bool {
        let Self { cancel_tx, handle } = self;
        let fired = handle.await.unwrap_or(false);
        // dropping the sender earlier would cancel
        drop(cancel_tx);
        fired
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(hits: &Arc<AtomicUsize>) -> impl FnMut() -> std::future::Ready<()> + Send + 'static {
        let hits = Arc::clone(hits);
        move || {
            hits.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_every_interval_until_stopped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(Duration::from_secs(10));
        scheduler.start(counting(&hits));

        tokio::time::sleep(Duration::from_secs(35)).await;
        scheduler.stop().await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn callback_can_stop_its_own_scheduler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(Duration::from_secs(5));
        let stop = scheduler.stop_handle();
        let h = Arc::clone(&hits);
        scheduler.start(move || {
            h.fetch_add(1, Ordering::SeqCst);
            stop.signal();
            std::future::ready(())
        });

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_tick_never_fires() {
        let hits = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(Duration::from_secs(5));
        scheduler.start(counting(&hits));
        scheduler.stop().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once_after_delay() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let started = Instant::now();
        let shot = OneShot::schedule(Duration::from_secs(90), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(shot.wait().await);
        assert!(started.elapsed() >= Duration::from_secs(90));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_one_shot_never_fires() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let shot = OneShot::schedule(Duration::from_secs(90), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(shot.cancel().await);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
