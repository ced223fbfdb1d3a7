//! Worker loops that drain the work queue.
//!
//! Each worker holds at most one key at a time. A panic inside a key's reconcile is caught and
//! retried like any other failure; a panic anywhere else restarts the worker after a short pause.

use super::sync::{Dispatcher, SyncOutcome};
use crate::queue::RateLimitingQueue;
use crate::reconcile::ReconcileError;
use crate::resource::{ReconcileKey, ResourceSpec};
use crate::runtime::fatal::panic_message;
use crate::runtime::telemetry::Telemetry;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WORKER_RESTART_DELAY: Duration = Duration::from_secs(1);

pub(crate) struct WorkerPool<S> {
    workers: usize,
    queue: Arc<RateLimitingQueue>,
    dispatcher: Dispatcher<S>,
    telemetry: Arc<Telemetry>,
    handles: Vec<JoinHandle<()>>,
}

pub(crate) struct WorkerPoolParams<S> {
    pub workers: usize,
    pub queue: Arc<RateLimitingQueue>,
    pub dispatcher: Dispatcher<S>,
    pub telemetry: Arc<Telemetry>,
}

impl<S: ResourceSpec> WorkerPool<S> {
    pub(crate) fn new(params: WorkerPoolParams<S>) -> Self {
        Self {
            workers: params.workers.max(1),
            queue: params.queue,
            dispatcher: params.dispatcher,
            telemetry: params.telemetry,
            handles: Vec::new(),
        }
    }

    pub(crate) fn launch(&mut self, shutdown: CancellationToken) {
        for worker_id in 0..self.workers {
            let worker = Worker {
                id: worker_id,
                queue: self.queue.clone(),
                dispatcher: self.dispatcher.clone(),
                telemetry: self.telemetry.clone(),
                shutdown: shutdown.clone(),
            };
            self.handles.push(tokio::spawn(worker.supervise()));
        }
        tracing::info!(
            queue = self.queue.name(),
            workers = self.workers,
            "worker pool started"
        );
    }

    /// Waits for every worker to exit.
    pub(crate) async fn join(&mut self) {
        let handles = std::mem::take(&mut self.handles);
        for (worker_id, result) in futures::future::join_all(handles)
            .await
            .into_iter()
            .enumerate()
        {
            if let Err(err) = result {
                tracing::warn!(worker = worker_id, error = %err, "worker task failed to join");
            }
        }
    }
}

struct Worker<S> {
    id: usize,
    queue: Arc<RateLimitingQueue>,
    dispatcher: Dispatcher<S>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
}

impl<S: ResourceSpec> Worker<S> {
    async fn supervise(self) {
        loop {
            match AssertUnwindSafe(self.run()).catch_unwind().await {
                Ok(()) => break,
                Err(payload) => {
                    let panic_msg = panic_message(payload.as_ref());
                    tracing::error!(
                        worker = self.id,
                        panic = %panic_msg,
                        "worker loop panicked; restarting"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(WORKER_RESTART_DELAY) => {}
                    }
                }
            }
        }
        tracing::debug!(worker = self.id, "worker exited");
    }

    async fn run(&self) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            let key = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                next = self.queue.get() => match next {
                    Some(key) => key,
                    None => return,
                },
            };
            self.process(key).await;
        }
    }

    async fn process(&self, key: ReconcileKey) {
        let _processing = ProcessingGuard {
            queue: &self.queue,
            key: &key,
        };

        let result = match AssertUnwindSafe(self.dispatcher.sync(&key))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                self.telemetry.record_panic();
                Err(ReconcileError::Panicked(panic_message(payload.as_ref())))
            }
        };

        match result {
            Ok(outcome) => {
                if outcome == SyncOutcome::Reconciled {
                    self.telemetry.record_reconciled();
                }
                self.queue.forget(&key);
                tracing::debug!(worker = self.id, key = %key, ?outcome, "key synced");
            }
            Err(err) => {
                if !err.is_panic() {
                    self.telemetry.record_reconcile_failure();
                }
                self.queue.add_rate_limited(key.clone());
                tracing::warn!(
                    worker = self.id,
                    key = %key,
                    requeues = self.queue.num_requeues(&key),
                    error = %err,
                    "error syncing key; retrying with backoff"
                );
            }
        }
    }
}

/// Marks the held key done on every exit path, unwinding included.
struct ProcessingGuard<'a> {
    queue: &'a RateLimitingQueue,
    key: &'a ReconcileKey,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.queue.done(self.key);
    }
}
