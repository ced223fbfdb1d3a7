use crate::queue::RateLimitingQueue;
use crate::runtime::config::MAX_INTERVAL;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the process-wide tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Counters shared by the queue, handlers and workers.
#[derive(Default, Debug)]
pub struct Telemetry {
    queue_adds: AtomicU64,
    retries: AtomicU64,
    reconciled: AtomicU64,
    reconcile_failures: AtomicU64,
    panics: AtomicU64,
    suppressed_notifications: AtomicU64,
    dropped_notifications: AtomicU64,
}

impl Telemetry {
    pub fn record_queue_add(&self) {
        self.queue_adds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconciled(&self) {
        self.reconciled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconcile_failure(&self) {
        self.reconcile_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Panics are also counted as failures.
    /// Counts a reconcile that panicked. Panics are not also counted as failures.
    pub fn record_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Notification for an already settled object.
    pub fn record_suppressed_notification(&self) {
        self.suppressed_notifications.fetch_add(1, Ordering::Relaxed);
    }

    /// Notification whose identity could not be resolved.
    pub fn record_dropped_notification(&self) {
        self.dropped_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            queue_adds: self.queue_adds.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            reconciled: self.reconciled.load(Ordering::Relaxed),
            reconcile_failures: self.reconcile_failures.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            suppressed_notifications: self.suppressed_notifications.load(Ordering::Relaxed),
            dropped_notifications: self.dropped_notifications.load(Ordering::Relaxed),
        }
    }

    pub fn reconciled(&self) -> u64 {
        self.reconciled.load(Ordering::Relaxed)
    }

    pub fn reconcile_failures(&self) -> u64 {
        self.reconcile_failures.load(Ordering::Relaxed)
    }

    pub fn panics(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub queue_adds: u64,
    pub retries: u64,
    pub reconciled: u64,
    pub reconcile_failures: u64,
    pub panics: u64,
    pub suppressed_notifications: u64,
    pub dropped_notifications: u64,
}

/// Spawns a background task that periodically logs queue depth and reconcile counters.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    queue: Arc<RateLimitingQueue>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval.min(MAX_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "reconciler::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let reconciled_delta = current.reconciled.saturating_sub(last_snapshot.reconciled);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        reconciled_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "reconciler::metrics",
                        queue = queue.name(),
                        depth = queue.len(),
                        throughput = format!("{throughput:.2}"),
                        adds = current.queue_adds,
                        retries = current.retries,
                        reconciled = current.reconciled,
                        failures = current.reconcile_failures,
                        panics = current.panics,
                        suppressed = current.suppressed_notifications,
                        dropped = current.dropped_notifications,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
