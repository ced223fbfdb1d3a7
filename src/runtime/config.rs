use crate::controller::DEFAULT_CACHE_SYNC_POLL_INTERVAL;
use crate::queue::rate_limiter::{
    DEFAULT_BUCKET_BURST, DEFAULT_BUCKET_QPS, DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY,
};
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_RESOURCE_NAME: &str = "product";
const DEFAULT_COMPONENT: &str = "controller";
const DEFAULT_WORKER_COUNT: usize = 1;
const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 15 * 60;
const DEFAULT_FINALIZER: &str = "operator.finalizers.product.estore.com";
const DEFAULT_EXIT_ERROR_CODE: i32 = 1;

/// Upper bound for every configured interval and delay; larger values would overflow timer
/// deadlines.
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

const ENV_RESOURCE_NAME: &str = "RECONCILER_RESOURCE_NAME";
const ENV_COMPONENT: &str = "RECONCILER_COMPONENT";
const ENV_QUEUE_NAME: &str = "RECONCILER_QUEUE_NAME";
const ENV_WORKERS: &str = "RECONCILER_WORKERS";
const ENV_RESYNC_SECS: &str = "RECONCILER_RESYNC_SECS";
const ENV_FINALIZER: &str = "RECONCILER_FINALIZER";
const ENV_EXIT_CODE: &str = "RECONCILER_EXIT_CODE";
const ENV_STORE_TARGET: &str = "RECONCILER_STORE_TARGET";
const ENV_RETRY_BASE_MS: &str = "RECONCILER_RETRY_BASE_MS";
const ENV_RETRY_MAX_SECS: &str = "RECONCILER_RETRY_MAX_SECS";
const ENV_BUCKET_QPS: &str = "RECONCILER_BUCKET_QPS";
const ENV_BUCKET_BURST: &str = "RECONCILER_BUCKET_BURST";
const ENV_METRICS_SECS: &str = "RECONCILER_METRICS_SECS";

/// Runtime configuration for one controller.
///
/// All instances must be constructed via [`ControllerConfig::builder`], [`ControllerConfig::new`]
/// or [`ControllerConfig::from_env`] so invariants are validated before any consumer observes the
/// values.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    resource_name: String,
    component: String,
    queue_name: String,
    worker_count: usize,
    resync_interval: Duration,
    finalizer: String,
    exit_error_code: i32,
    store_target: Option<String>,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
    bucket_qps: f64,
    bucket_burst: u32,
    cache_sync_poll_interval: Duration,
    metrics_interval: Duration,
}

pub struct ControllerConfigParams {
    pub resource_name: String,
    pub component: String,
    pub queue_name: String,
    pub worker_count: usize,
    pub resync_interval: Duration,
    pub finalizer: String,
    pub exit_error_code: i32,
    pub store_target: Option<String>,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub bucket_qps: f64,
    pub bucket_burst: u32,
    pub cache_sync_poll_interval: Duration,
    pub metrics_interval: Duration,
}

impl ControllerConfig {
    /// Returns a builder where every field starts at its default.
    pub fn builder() -> ControllerConfigBuilder {
        ControllerConfigBuilder::default()
    }

    /// Constructs and validates a configuration from fully specified values.
    pub fn new(params: ControllerConfigParams) -> Result<Self> {
        let ControllerConfigParams {
            resource_name,
            component,
            queue_name,
            worker_count,
            resync_interval,
            finalizer,
            exit_error_code,
            store_target,
            retry_base_delay,
            retry_max_delay,
            bucket_qps,
            bucket_burst,
            cache_sync_poll_interval,
            metrics_interval,
        } = params;

        let config = Self {
            resource_name: trimmed_string(resource_name),
            component: trimmed_string(component),
            queue_name: trimmed_string(queue_name),
            worker_count,
            resync_interval,
            finalizer: trimmed_string(finalizer),
            exit_error_code,
            store_target: store_target
                .map(trimmed_string)
                .filter(|target| !target.is_empty()),
            retry_base_delay,
            retry_max_delay,
            bucket_qps,
            bucket_burst,
            cache_sync_poll_interval,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reads `RECONCILER_*` variables from the process environment; unset ones keep defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ControllerConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let mut builder = Self::builder();

        if let Some(value) = lookup(ENV_RESOURCE_NAME) {
            builder = builder.resource_name(value);
        }
        if let Some(value) = lookup(ENV_COMPONENT) {
            builder = builder.component(value);
        }
        if let Some(value) = lookup(ENV_QUEUE_NAME) {
            builder = builder.queue_name(value);
        }
        if let Some(value) = lookup(ENV_WORKERS) {
            builder = builder.worker_count(parse_var(ENV_WORKERS, &value)?);
        }
        if let Some(value) = lookup(ENV_RESYNC_SECS) {
            let secs = parse_var(ENV_RESYNC_SECS, &value)?;
            builder = builder.resync_interval(Duration::from_secs(secs));
        }
        if let Some(value) = lookup(ENV_FINALIZER) {
            builder = builder.finalizer(value);
        }
        if let Some(value) = lookup(ENV_EXIT_CODE) {
            builder = builder.exit_error_code(parse_var(ENV_EXIT_CODE, &value)?);
        }
        if let Some(value) = lookup(ENV_STORE_TARGET) {
            builder = builder.store_target(value);
        }
        if let Some(value) = lookup(ENV_RETRY_BASE_MS) {
            let millis = parse_var(ENV_RETRY_BASE_MS, &value)?;
            builder = builder.retry_base_delay(Duration::from_millis(millis));
        }
        if let Some(value) = lookup(ENV_RETRY_MAX_SECS) {
            let secs = parse_var(ENV_RETRY_MAX_SECS, &value)?;
            builder = builder.retry_max_delay(Duration::from_secs(secs));
        }
        if let Some(value) = lookup(ENV_BUCKET_QPS) {
            builder = builder.bucket_qps(parse_var(ENV_BUCKET_QPS, &value)?);
        }
        if let Some(value) = lookup(ENV_BUCKET_BURST) {
            builder = builder.bucket_burst(parse_var(ENV_BUCKET_BURST, &value)?);
        }
        if let Some(value) = lookup(ENV_METRICS_SECS) {
            let secs = parse_var(ENV_METRICS_SECS, &value)?;
            builder = builder.metrics_interval(Duration::from_secs(secs));
        }

        builder.build()
    }

    /// Kind of resource reconciled, e.g. `product`.
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// `{resource_name}-{component}`; the event source and log label of the controller.
    pub fn controller_name(&self) -> String {
        format!("{}-{}", self.resource_name, self.component)
    }

    /// Label carried by the work queue in metrics.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn resync_interval(&self) -> Duration {
        self.resync_interval
    }

    /// Finalizer token guarding deletion of reconciled objects.
    pub fn finalizer(&self) -> &str {
        &self.finalizer
    }

    /// Process exit code reported for fatal startup failures.
    pub fn exit_error_code(&self) -> i32 {
        self.exit_error_code
    }

    /// Connection target of the resource store, consumed by whoever builds the store client.
    pub fn store_target(&self) -> Option<&str> {
        self.store_target.as_deref()
    }

    pub fn retry_base_delay(&self) -> Duration {
        self.retry_base_delay
    }

    pub fn retry_max_delay(&self) -> Duration {
        self.retry_max_delay
    }

    pub fn bucket_qps(&self) -> f64 {
        self.bucket_qps
    }

    pub fn bucket_burst(&self) -> u32 {
        self.bucket_burst
    }

    pub fn cache_sync_poll_interval(&self) -> Duration {
        self.cache_sync_poll_interval
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        ensure_not_empty(&self.resource_name, "resource_name")?;
        ensure_not_empty(&self.component, "component")?;
        ensure_not_empty(&self.queue_name, "queue_name")?;
        ensure_not_empty(&self.finalizer, "finalizer")?;

        if self.worker_count == 0 {
            bail!("worker_count must be greater than 0");
        }

        ensure_interval(self.resync_interval, "resync_interval")?;

        if self.exit_error_code == 0 {
            bail!("exit_error_code must be non-zero");
        }

        ensure_interval(self.retry_base_delay, "retry_base_delay")?;
        ensure_interval(self.retry_max_delay, "retry_max_delay")?;

        if self.retry_base_delay > self.retry_max_delay {
            bail!(
                "retry_base_delay ({:?}) must not exceed retry_max_delay ({:?})",
                self.retry_base_delay,
                self.retry_max_delay
            );
        }

        if !(self.bucket_qps.is_finite() && self.bucket_qps > 0.0) {
            bail!("bucket_qps must be a positive number");
        }

        if self.bucket_burst == 0 {
            bail!("bucket_burst must be greater than 0");
        }

        ensure_interval(self.cache_sync_poll_interval, "cache_sync_poll_interval")?;
        ensure_interval(self.metrics_interval, "metrics_interval")?;

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ControllerConfigBuilder {
    resource_name: Option<String>,
    component: Option<String>,
    queue_name: Option<String>,
    worker_count: Option<usize>,
    resync_interval: Option<Duration>,
    finalizer: Option<String>,
    exit_error_code: Option<i32>,
    store_target: Option<String>,
    retry_base_delay: Option<Duration>,
    retry_max_delay: Option<Duration>,
    bucket_qps: Option<f64>,
    bucket_burst: Option<u32>,
    cache_sync_poll_interval: Option<Duration>,
    metrics_interval: Option<Duration>,
}

impl ControllerConfigBuilder {
    pub fn resource_name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = Some(name.into());
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = Some(interval);
        self
    }

    pub fn finalizer(mut self, token: impl Into<String>) -> Self {
        self.finalizer = Some(token.into());
        self
    }

    pub fn exit_error_code(mut self, code: i32) -> Self {
        self.exit_error_code = Some(code);
        self
    }

    pub fn store_target(mut self, target: impl Into<String>) -> Self {
        self.store_target = Some(target.into());
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = Some(delay);
        self
    }

    pub fn bucket_qps(mut self, qps: f64) -> Self {
        self.bucket_qps = Some(qps);
        self
    }

    pub fn bucket_burst(mut self, burst: u32) -> Self {
        self.bucket_burst = Some(burst);
        self
    }

    pub fn cache_sync_poll_interval(mut self, interval: Duration) -> Self {
        self.cache_sync_poll_interval = Some(interval);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<ControllerConfig> {
        let resource_name = self
            .resource_name
            .unwrap_or_else(|| DEFAULT_RESOURCE_NAME.to_owned());
        let queue_name = self.queue_name.unwrap_or_else(|| resource_name.clone());

        let params = ControllerConfigParams {
            resource_name,
            component: self
                .component
                .unwrap_or_else(|| DEFAULT_COMPONENT.to_owned()),
            queue_name,
            worker_count: self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT),
            resync_interval: self
                .resync_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS)),
            finalizer: self
                .finalizer
                .unwrap_or_else(|| DEFAULT_FINALIZER.to_owned()),
            exit_error_code: self.exit_error_code.unwrap_or(DEFAULT_EXIT_ERROR_CODE),
            store_target: self.store_target,
            retry_base_delay: self.retry_base_delay.unwrap_or(DEFAULT_RETRY_BASE_DELAY),
            retry_max_delay: self.retry_max_delay.unwrap_or(DEFAULT_RETRY_MAX_DELAY),
            bucket_qps: self.bucket_qps.unwrap_or(DEFAULT_BUCKET_QPS),
            bucket_burst: self.bucket_burst.unwrap_or(DEFAULT_BUCKET_BURST),
            cache_sync_poll_interval: self
                .cache_sync_poll_interval
                .unwrap_or(DEFAULT_CACHE_SYNC_POLL_INTERVAL),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        ControllerConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn ensure_interval(value: Duration, field: &str) -> Result<()> {
    if value.is_zero() {
        bail!("{field} must be greater than 0");
    }
    if value > MAX_INTERVAL {
        bail!("{field} ({value:?}) must not exceed {MAX_INTERVAL:?}");
    }
    Ok(())
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("{name} has invalid value {value:?}"))
}
