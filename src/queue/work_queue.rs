use crate::resource::ReconcileKey;
use crate::runtime::telemetry::Telemetry;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

struct QueueState {
    /// Keys ready to be handed out, in insertion order.
    queue: VecDeque<ReconcileKey>,
    /// Keys that need processing: everything in `queue` plus keys re-added while in flight.
    dirty: HashSet<ReconcileKey>,
    /// Keys currently held by a worker.
    processing: HashSet<ReconcileKey>,
    shutting_down: bool,
}

impl QueueState {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            shutting_down: false,
        }
    }
}

/// Deduplicating FIFO of reconcile keys.
///
/// A key is pending at most once. A key re-added while a worker holds it is only marked dirty and
/// goes back into the queue when that worker calls [`WorkQueue::done`], so no two workers ever
/// process the same key at the same time.
pub struct WorkQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    telemetry: Arc<Telemetry>,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>, telemetry: Arc<Telemetry>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::new()),
            notify: Notify::new(),
            telemetry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Marks `key` as needing processing. Ignored once the queue is shutting down.
    pub fn add(&self, key: ReconcileKey) {
        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }
        if !state.dirty.insert(key.clone()) {
            return;
        }
        self.telemetry.record_queue_add();
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Waits for the next ready key. Returns `None` once the queue is shut down and drained.
    ///
    /// Cancel-safe: dropping the future before it resolves leaves the queue untouched.
    pub async fn get(&self) -> Option<ReconcileKey> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more_ready = !state.queue.is_empty();
                    drop(state);
                    if more_ready {
                        // Pass the wake-up on so idle workers pick up the rest.
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Ends processing of `key`; re-queues it if it was added again in the meantime.
    pub fn done(&self, key: &ReconcileKey) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stops accepting keys and wakes every waiting worker. Keys already queued are still handed
    /// out until the queue drains.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shutting_down {
            return;
        }
        state.shutting_down = true;
        drop(state);
        tracing::debug!(queue = %self.name, "work queue shutting down");
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Number of keys ready to be handed out.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    pub fn is_processing(&self, key: &ReconcileKey) -> bool {
        self.state.lock().processing.contains(key)
    }
}
