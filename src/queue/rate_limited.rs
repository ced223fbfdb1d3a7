use super::delaying::{spawn_delay_loop, WaitingKey, WaitingSender};
use super::rate_limiter::RateLimiter;
use super::work_queue::WorkQueue;
use crate::resource::ReconcileKey;
use crate::runtime::telemetry::Telemetry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Work queue with delayed and backoff-driven insertion.
///
/// Must be constructed inside a tokio runtime: it owns the background task that releases delayed
/// keys.
pub struct RateLimitingQueue {
    queue: Arc<WorkQueue>,
    limiter: Box<dyn RateLimiter>,
    waiting_tx: WaitingSender,
    delay_shutdown: CancellationToken,
    delay_loop: Mutex<Option<JoinHandle<()>>>,
    telemetry: Arc<Telemetry>,
}

impl RateLimitingQueue {
    pub fn new(
        name: impl Into<String>,
        limiter: Box<dyn RateLimiter>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let queue = Arc::new(WorkQueue::new(name, telemetry.clone()));
        let (waiting_tx, waiting_rx) = tokio::sync::mpsc::unbounded_channel();
        let delay_shutdown = CancellationToken::new();
        let delay_loop = spawn_delay_loop(queue.clone(), waiting_rx, delay_shutdown.clone());

        Self {
            queue,
            limiter,
            waiting_tx,
            delay_shutdown,
            delay_loop: Mutex::new(Some(delay_loop)),
            telemetry,
        }
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }

    pub fn add(&self, key: ReconcileKey) {
        self.queue.add(key);
    }

    /// Adds `key` once `delay` has elapsed. A zero delay adds immediately.
    pub fn add_after(&self, key: ReconcileKey, delay: Duration) {
        if self.queue.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.queue.add(key);
            return;
        }

        let Some(ready_at) = Instant::now().checked_add(delay) else {
            tracing::warn!(
                queue = self.name(),
                key = %key,
                ?delay,
                "delay exceeds the timer range; key dropped"
            );
            return;
        };
        let entry = WaitingKey { ready_at, key };
        if self.waiting_tx.send(entry).is_err() {
            tracing::debug!(queue = self.name(), "delayed insertion loop already stopped");
        }
    }

    /// Schedules `key` after the backoff its failure history calls for, and records one more
    /// failure.
    pub fn add_rate_limited(&self, key: ReconcileKey) {
        let delay = self.limiter.when(&key);
        self.telemetry.record_retry();
        tracing::debug!(
            queue = self.name(),
            key = %key,
            delay_ms = delay.as_millis() as u64,
            requeues = self.limiter.num_requeues(&key),
            "rescheduling key with backoff"
        );
        self.add_after(key, delay);
    }

    /// Clears the failure history of `key`; a pending entry stays queued.
    pub fn forget(&self, key: &ReconcileKey) {
        self.limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &ReconcileKey) -> u32 {
        self.limiter.num_requeues(key)
    }

    /// See [`WorkQueue::get`].
    pub async fn get(&self) -> Option<ReconcileKey> {
        self.queue.get().await
    }

    pub fn done(&self, key: &ReconcileKey) {
        self.queue.done(key);
    }

    /// Closes the queue and stops the delayed-insertion loop. Keys still waiting are dropped.
    pub fn shutdown(&self) {
        self.stop_delay_loop();
        self.queue.shutdown();
    }

    /// Whether the delayed-insertion loop is still running.
    pub fn delay_loop_running(&self) -> bool {
        self.delay_loop
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn stop_delay_loop(&self) {
        self.delay_shutdown.cancel();
        if let Some(handle) = self.delay_loop.lock().take() {
            handle.abort();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_processing(&self, key: &ReconcileKey) -> bool {
        self.queue.is_processing(key)
    }
}

impl Drop for RateLimitingQueue {
    fn drop(&mut self) {
        self.stop_delay_loop();
    }
}
