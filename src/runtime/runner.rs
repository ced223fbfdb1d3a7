use crate::cache::{FeedEvent, Informer, SnapshotCache};
use crate::controller::{Controller, ControllerParams};
use crate::queue::{default_controller_rate_limiter, RateLimitingQueue};
use crate::reconcile::{
    DomainLogic, EventRecorder, EventReporter, FinalizingReconciler, Reconciler, ResourceStore,
};
use crate::resource::ResourceSpec;
use crate::runtime::config::ControllerConfig;
use crate::runtime::fatal::{panic_message, FatalErrorHandler, StartupError};
use crate::runtime::telemetry::{self, Telemetry};
use futures::Stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Wires cache, informer, queue and controller together and handles OS signals for graceful
/// shutdowns.
///
/// A runner runs once: stopping it shuts its work queue down for good, so a second call to
/// [`Runner::run`] fails with [`StartupError::AlreadyStarted`]. Build a new runner to restart.
pub struct Runner<S> {
    config: ControllerConfig,
    telemetry: Arc<Telemetry>,
    informer: Arc<Informer<S>>,
    controller: Arc<Controller<S>>,
    fatal: FatalErrorHandler,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl<S: ResourceSpec> Runner<S> {
    /// Builds the pipeline around `reconciler`. Must be called within a tokio runtime.
    pub fn new(
        config: ControllerConfig,
        reconciler: Arc<dyn Reconciler<S>>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        let telemetry = Arc::new(Telemetry::default());
        let cache: Arc<SnapshotCache<S>> = Arc::new(SnapshotCache::new());
        let queue = Arc::new(RateLimitingQueue::new(
            config.queue_name(),
            Box::new(default_controller_rate_limiter(
                config.retry_base_delay(),
                config.retry_max_delay(),
                config.bucket_qps(),
                config.bucket_burst(),
            )),
            telemetry.clone(),
        ));
        let controller = Arc::new(Controller::new(ControllerParams {
            name: config.controller_name(),
            cache: cache.clone(),
            reconciler,
            queue,
            recorder,
            telemetry: telemetry.clone(),
            cache_sync_poll_interval: config.cache_sync_poll_interval(),
        }));
        let informer = Arc::new(Informer::new(cache));
        informer.add_handler(controller.event_handler());

        let shutdown = CancellationToken::new();
        Self {
            config,
            telemetry,
            informer,
            controller,
            fatal: FatalErrorHandler::new(shutdown.clone()),
            shutdown,
            started: AtomicBool::new(false),
        }
    }

    /// Builds the pipeline with a [`FinalizingReconciler`] over `store` and `domain`.
    pub fn with_domain<D: DomainLogic<S>>(
        config: ControllerConfig,
        store: Arc<dyn ResourceStore<S>>,
        domain: D,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        let events = EventReporter::new(config.controller_name(), recorder.clone());
        let reconciler = Arc::new(FinalizingReconciler::new(
            store,
            domain,
            events,
            config.finalizer(),
        ));
        Self::new(config, reconciler, recorder)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn cache(&self) -> Arc<SnapshotCache<S>> {
        self.informer.cache()
    }

    pub fn controller(&self) -> Arc<Controller<S>> {
        self.controller.clone()
    }

    /// Root token cancelled by Ctrl-C and by fatal startup errors.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The fatal startup error, once one has occurred.
    pub fn error(&self) -> Option<StartupError> {
        self.fatal.error()
    }

    /// Consumes `feed` and runs the controller until `stop` fires.
    ///
    /// Fails when `stop` fires before the cache finished its initial sync, when the watch feed
    /// task panics, or when the runner was already started.
    pub async fn run<F>(&self, feed: F, stop: CancellationToken) -> Result<(), StartupError>
    where
        F: Stream<Item = FeedEvent<S>> + Send + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!(controller = %self.controller.name(), "runner already started");
            return Err(StartupError::AlreadyStarted {
                controller: self.controller.name().to_owned(),
            });
        }

        let run_token = stop.child_token();
        let metrics_handle = telemetry::spawn_metrics_reporter(
            self.telemetry.clone(),
            self.controller.queue(),
            run_token.clone(),
            self.config.metrics_interval(),
        );
        let feed_handle = {
            let informer = self.informer.clone();
            let resync_interval = self.config.resync_interval();
            let feed_token = run_token.clone();
            tokio::spawn(async move { informer.run(feed, resync_interval, feed_token).await })
        };
        // A panicking feed leaves the cache frozen; treat it as fatal.
        let feed_watch = {
            let fatal = self.fatal.clone();
            let run_token = run_token.clone();
            let controller = self.controller.name().to_owned();
            tokio::spawn(async move {
                match feed_handle.await {
                    Ok(()) => {}
                    Err(err) if err.is_panic() => {
                        let reason = panic_message(err.into_panic().as_ref());
                        fatal.trigger(StartupError::InformerPanicked { controller, reason });
                        run_token.cancel();
                    }
                    Err(err) => tracing::warn!(error = %err, "watch feed task was cancelled"),
                }
            })
        };

        tracing::info!(
            controller = %self.controller.name(),
            store_target = self.config.store_target().unwrap_or("<external>"),
            "runner started"
        );
        let result = self
            .controller
            .run(self.config.worker_count(), run_token.clone())
            .await;
        run_token.cancel();

        if let Err(err) = feed_watch.await {
            tracing::warn!(error = %err, "watch feed supervisor failed to join");
        }
        if let Err(err) = metrics_handle.await {
            tracing::warn!(error = %err, "metrics reporter task panicked");
        }

        if let Err(err) = result {
            self.fatal.trigger(err);
        }
        match self.fatal.error() {
            Some(err) => Err(err),
            None => {
                tracing::info!(controller = %self.controller.name(), "runner stopped");
                Ok(())
            }
        }
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the root token is cancelled elsewhere.
    pub async fn run_until_ctrl_c<F>(&self, feed: F) -> Result<(), StartupError>
    where
        F: Stream<Item = FeedEvent<S>> + Send + 'static,
    {
        let stop = self.shutdown.clone();
        let signal_watcher = {
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = signal::ctrl_c() => {
                        tracing::info!("Ctrl-C received; shutting down runner");
                        stop.cancel();
                    }
                    _ = stop.cancelled() => {}
                }
            })
        };

        let result = self.run(feed, stop.clone()).await;
        stop.cancel();
        if let Err(err) = signal_watcher.await {
            tracing::warn!(error = %err, "signal watcher task panicked");
        }
        result
    }

    /// Process exit code for the outcome of [`Runner::run`].
    pub fn exit_code(&self, result: &Result<(), StartupError>) -> i32 {
        match result {
            Ok(()) => 0,
            Err(_) => self.config.exit_error_code(),
        }
    }
}
