use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use reconciler::{
    ControllerConfig, DomainFuture, DomainLogic, MemoryRecorder, Phase, Resource, Runner,
    StartupError,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use super::memory_store::MemoryStore;

pub const NAMESPACE: &str = "shop";
pub const FINALIZER: &str = "operator.finalizers.product.estore.com";
const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSpec {
    pub sku: String,
    pub price_cents: u64,
}

pub fn product(name: &str, phase: Phase) -> Resource<ProductSpec> {
    let mut object = Resource::new(
        NAMESPACE,
        name,
        ProductSpec {
            sku: format!("sku-{name}"),
            price_cents: 1_000,
        },
    )
    .with_phase(phase);
    object.metadata.finalizers.push(FINALIZER.to_owned());
    object
}

pub fn key(name: &str) -> String {
    format!("{NAMESPACE}/{name}")
}

pub fn test_config(workers: usize) -> ControllerConfig {
    ControllerConfig::builder()
        .worker_count(workers)
        .finalizer(FINALIZER)
        .retry_base_delay(Duration::from_millis(5))
        .retry_max_delay(Duration::from_millis(200))
        .cache_sync_poll_interval(Duration::from_millis(5))
        .metrics_interval(Duration::from_secs(1))
        .resync_interval(Duration::from_secs(600))
        .exit_error_code(7)
        .build()
        .expect("test config is valid")
}

type ApplyHook = Box<dyn FnOnce() + Send>;

/// Shared switches and counters behind [`RecordingDomain`].
#[derive(Default)]
pub struct DomainState {
    applies: AtomicUsize,
    teardowns: AtomicUsize,
    fail_teardown: AtomicBool,
    panic_on: Mutex<HashSet<String>>,
    before_apply: Mutex<Option<ApplyHook>>,
}

impl DomainState {
    pub fn applies(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    pub fn fail_teardown(&self, fail: bool) {
        self.fail_teardown.store(fail, Ordering::SeqCst);
    }

    pub fn panic_on(&self, name: &str, enabled: bool) {
        let mut names = self.panic_on.lock();
        if enabled {
            names.insert(name.to_owned());
        } else {
            names.remove(name);
        }
    }

    /// Runs `hook` once, at the start of the next apply.
    pub fn before_next_apply<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.before_apply.lock() = Some(Box::new(hook));
    }
}

/// Domain logic that records calls and fails or panics on demand.
#[derive(Clone, Default)]
pub struct RecordingDomain {
    state: Arc<DomainState>,
}

impl RecordingDomain {
    pub fn new() -> (Self, Arc<DomainState>) {
        let domain = Self::default();
        let state = domain.state.clone();
        (domain, state)
    }
}

impl DomainLogic<ProductSpec> for RecordingDomain {
    fn apply<'a>(&'a self, object: &'a mut Resource<ProductSpec>) -> DomainFuture<'a> {
        Box::pin(async move {
            let hook = self.state.before_apply.lock().take();
            if let Some(hook) = hook {
                hook();
            }
            self.state.applies.fetch_add(1, Ordering::SeqCst);
            if self.state.panic_on.lock().contains(object.name()) {
                panic!("pricing backend exploded for {}", object.name());
            }
            Ok(())
        })
    }

    fn teardown<'a>(&'a self, object: &'a mut Resource<ProductSpec>) -> DomainFuture<'a> {
        Box::pin(async move {
            self.state.teardowns.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_teardown.load(Ordering::SeqCst) {
                return Err(anyhow!("catalog still references {}", object.name()));
            }
            Ok(())
        })
    }
}

/// A runner over [`MemoryStore`] plus everything a test needs to drive and observe it.
pub struct Harness {
    pub runner: Arc<Runner<ProductSpec>>,
    pub store: Arc<MemoryStore<ProductSpec>>,
    pub domain: Arc<DomainState>,
    pub recorder: Arc<MemoryRecorder>,
    stop: CancellationToken,
    handle: JoinHandle<Result<(), StartupError>>,
}

impl Harness {
    /// Seeds `objects`, starts the runner, then publishes the initial listing.
    pub async fn start(config: ControllerConfig, objects: Vec<Resource<ProductSpec>>) -> Self {
        let (store, feed) = MemoryStore::new();
        for object in objects {
            store.seed(object);
        }
        let (domain, domain_state) = RecordingDomain::new();
        let recorder = Arc::new(MemoryRecorder::default());
        let runner = Arc::new(Runner::with_domain(
            config,
            store.clone(),
            domain,
            recorder.clone(),
        ));
        let stop = CancellationToken::new();
        let handle = {
            let runner = runner.clone();
            let stop = stop.clone();
            tokio::spawn(async move { runner.run(feed, stop).await })
        };
        store.publish_listing();

        Self {
            runner,
            store,
            domain: domain_state,
            recorder,
            stop,
            handle,
        }
    }

    pub fn num_requeues(&self, name: &str) -> u32 {
        self.runner
            .controller()
            .queue()
            .num_requeues(&reconciler::ReconcileKey::new(key(name)))
    }

    pub async fn stop(self) -> Result<()> {
        self.stop.cancel();
        let result = tokio::time::timeout(WAIT_TIMEOUT, self.handle).await??;
        assert_eq!(self.runner.exit_code(&result), 0);
        result.map_err(Into::into)
    }
}

/// Polls `condition` every few milliseconds until it holds.
pub async fn wait_until<F>(what: &str, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    loop {
        if condition() {
            return Ok(());
        }
        if start.elapsed() > WAIT_TIMEOUT {
            bail!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_phase(harness: &Harness, name: &str, phase: Phase) -> Result<()> {
    let key = key(name);
    wait_until(&format!("{key} to reach {phase}"), || {
        harness
            .store
            .get(&key)
            .is_some_and(|object| object.phase() == phase)
    })
    .await
}

pub async fn wait_for_removal(harness: &Harness, name: &str) -> Result<()> {
    let key = key(name);
    wait_until(&format!("{key} to be removed"), || {
        harness.store.get(&key).is_none()
    })
    .await
}
