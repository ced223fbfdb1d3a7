//! Lifecycle orchestration for [`Controller`].

use super::handlers::{KeyExtractor, QueueingHandler};
use super::sync::Dispatcher;
use super::worker_pool::{WorkerPool, WorkerPoolParams};
use crate::cache::{ObjectCache, ResourceEventHandler};
use crate::queue::RateLimitingQueue;
use crate::reconcile::{EventRecorder, EventReporter, Reconciler};
use crate::resource::ResourceSpec;
use crate::runtime::fatal::StartupError;
use crate::runtime::telemetry::Telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CACHE_SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct ControllerParams<S> {
    /// Used as the event source and in logs.
    pub name: String,
    pub cache: Arc<dyn ObjectCache<S>>,
    pub reconciler: Arc<dyn Reconciler<S>>,
    pub queue: Arc<RateLimitingQueue>,
    pub recorder: Arc<dyn EventRecorder>,
    pub telemetry: Arc<Telemetry>,
    pub cache_sync_poll_interval: Duration,
}

/// Generic drive loop: feed handler in, worker pool out.
pub struct Controller<S> {
    name: String,
    cache: Arc<dyn ObjectCache<S>>,
    queue: Arc<RateLimitingQueue>,
    dispatcher: Dispatcher<S>,
    handler: Arc<QueueingHandler>,
    telemetry: Arc<Telemetry>,
    cache_sync_poll_interval: Duration,
}

impl<S: ResourceSpec> Controller<S> {
    pub fn new(params: ControllerParams<S>) -> Self {
        let ControllerParams {
            name,
            cache,
            reconciler,
            queue,
            recorder,
            telemetry,
            cache_sync_poll_interval,
        } = params;

        let extractor = KeyExtractor::new(EventReporter::new(&name, recorder), telemetry.clone());
        let handler = Arc::new(QueueingHandler::new(extractor, queue.clone()));
        let dispatcher = Dispatcher::new(cache.clone(), reconciler);

        Self {
            name,
            cache,
            queue,
            dispatcher,
            handler,
            telemetry,
            cache_sync_poll_interval,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handler to register with the informer feeding this controller.
    pub fn event_handler(&self) -> Arc<dyn ResourceEventHandler<S>> {
        self.handler.clone()
    }

    pub fn queue(&self) -> Arc<RateLimitingQueue> {
        self.queue.clone()
    }

    /// Waits for the cache to sync, then runs `workers` loops until `shutdown` fires.
    ///
    /// The queue is shut down on every exit path. In-flight reconciliations finish before this
    /// returns; keys still queued are abandoned.
    pub async fn run(
        &self,
        workers: usize,
        shutdown: CancellationToken,
    ) -> Result<(), StartupError> {
        let _queue_guard = QueueShutdownGuard(&self.queue);
        tracing::info!(controller = %self.name, workers, "starting controller");

        wait_for_cache_sync(
            &self.name,
            self.cache.as_ref(),
            self.cache_sync_poll_interval,
            &shutdown,
        )
        .await?;

        let mut pool = WorkerPool::new(WorkerPoolParams {
            workers,
            queue: self.queue.clone(),
            dispatcher: self.dispatcher.clone(),
            telemetry: self.telemetry.clone(),
        });
        pool.launch(shutdown.clone());

        shutdown.cancelled().await;
        tracing::info!(controller = %self.name, "shutting down workers");
        self.queue.shutdown();
        pool.join().await;
        tracing::info!(controller = %self.name, "controller stopped");
        Ok(())
    }
}

/// Polls `cache` until it reports an initial sync. Fails if `shutdown` fires first.
pub async fn wait_for_cache_sync<S: Send + Sync + 'static>(
    controller: &str,
    cache: &dyn ObjectCache<S>,
    poll_interval: Duration,
    shutdown: &CancellationToken,
) -> Result<(), StartupError> {
    tracing::info!(controller, "waiting for cache to sync");
    loop {
        if cache.has_synced() {
            tracing::info!(controller, "cache synced");
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                return Err(StartupError::CacheSyncCancelled {
                    controller: controller.to_owned(),
                });
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

struct QueueShutdownGuard<'a>(&'a RateLimitingQueue);

impl Drop for QueueShutdownGuard<'_> {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}
