//! The pool composition root: core, background jobs and lifecycle

use std::collections::HashMap;
use std::panic;
use std::sync::Arc;

use crate::config::PoolConfiguration;
use crate::count_keeper::ResourceCountKeeper;
use crate::errors::{PoolError, PoolResult};
use crate::events::{EventSink, TracingSink};
use crate::health::{AsyncHealthCheck, HealthCheck, RuntimeHealthCheck};
use crate::health_care::HealthCareJob;
use crate::hook::{NoopHook, PoolControl, PoolManagementHook};
use crate::metrics::PoolMetrics;
#[cfg(feature = "metrics")]
use crate::metrics::MetricsExporter;
use crate::pool_core::{PoolCore, PooledResource, ResourceFactory};
use crate::signal::{JobHandle, JobSignal};
use crate::status::PoolStatus;

/// A background job owned by the pool
struct Job {
    signal: Arc<JobSignal>,
    handle: JobHandle,
}

/// Thread-safe pool of shared resources.
///
/// Resources come from a factory, are handed out as [`PooledResource`]
/// handles and go back to the pool when the last clone of a handle is
/// dropped. Depending on the configuration, a count keeper thread keeps the
/// number of live resources at the desired count and a health-care thread
/// checks idle resources and replaces the ones that fail.
///
/// Dropping the pool (or calling [`Pool::shutdown`]) stops and joins both
/// threads and destroys every idle resource. Handles still held by callers
/// stay valid; their resources are destroyed when the handles go away.
///
/// # Examples
///
/// ```
/// use esox_respool::{Pool, PoolConfiguration, ResourceCreationError};
///
/// let pool = Pool::builder(|| Ok::<_, ResourceCreationError>(String::from("conn")))
///     .config(PoolConfiguration::new().with_counts(0, 0, 2).without_count_keeper())
///     .build()
///     .unwrap();
///
/// let first = pool.acquire().unwrap();
/// let _second = pool.acquire().unwrap();
/// assert!(pool.acquire().is_err());
///
/// drop(first);
/// assert!(pool.try_acquire().is_some());
/// ```
pub struct Pool<R: Send + Sync + 'static> {
    core: Arc<PoolCore<R>>,
    count_keeper: Option<Job>,
    health_care: Option<Job>,
}

impl<R: Send + Sync + 'static> Pool<R> {
    /// Start building a pool around `factory`
    #[must_use]
    pub fn builder<F>(factory: F) -> PoolBuilder<R>
    where
        F: ResourceFactory<R> + 'static,
    {
        PoolBuilder::new(factory)
    }

    /// Get a resource from the pool.
    ///
    /// Hands out an idle resource when there is one, otherwise creates a new
    /// one while below `max_count`. Fails fast with
    /// [`PoolError::Exhausted`] when neither is possible; there is no
    /// waiting for a release.
    pub fn acquire(&self) -> PoolResult<PooledResource<R>> {
        self.core.acquire()
    }

    /// Like [`Pool::acquire`], discarding the reason for a failure
    pub fn try_acquire(&self) -> Option<PooledResource<R>> {
        self.acquire().ok()
    }

    /// Get a resource without blocking the async runtime.
    ///
    /// Runs [`Pool::acquire`] on tokio's blocking thread pool, since it may
    /// call the factory and the health check.
    pub async fn acquire_async(&self) -> PoolResult<PooledResource<R>> {
        let core = Arc::clone(&self.core);
        match tokio::task::spawn_blocking(move || core.acquire()).await {
            Ok(result) => result,
            Err(error) if error.is_panic() => panic::resume_unwind(error.into_panic()),
            Err(_) => Err(PoolError::Cancelled),
        }
    }

    /// Snapshot of the slot table
    pub fn status(&self) -> PoolStatus {
        self.core.status()
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        self.core.metrics.get_metrics(&self.status())
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.metrics().export()
    }

    /// Export metrics in Prometheus format, labelled with the pool name
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        MetricsExporter::export_prometheus(&self.metrics(), self.core.name(), tags)
    }

    /// The count the count keeper currently converges toward
    pub fn desired_count(&self) -> usize {
        self.core.desired_count()
    }

    /// Move the count keeper target. The value is clamped to
    /// `[min_count, max_count]`; the clamped value is returned.
    pub fn set_desired_count(&self, desired: usize) -> usize {
        self.core.set_desired_count(desired)
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn config(&self) -> &PoolConfiguration {
        self.core.config()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Stop the background jobs and destroy idle resources.
    ///
    /// Equivalent to dropping the pool.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.core.is_closed() {
            return;
        }
        self.core.close();

        let jobs = [self.count_keeper.as_mut(), self.health_care.as_mut()];
        for job in jobs.iter().flatten() {
            job.signal.stop();
        }
        for job in jobs.into_iter().flatten() {
            job.handle.join();
        }

        self.core.drain();
        tracing::info!(pool = self.core.name(), "resource pool closed");
    }
}

impl<R: Send + Sync + 'static> Drop for Pool<R> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builder for creating a [`Pool`].
///
/// # Examples
///
/// ```
/// use esox_respool::{
///     HealthVerdict, LoadScalingHook, Pool, PoolConfiguration, ResourceCreationError,
/// };
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_counts(1, 2, 8)
///     .with_count_keeper_interval(Duration::from_millis(200))
///     .with_health_check_interval(Duration::from_secs(10));
///
/// let pool = Pool::builder(|| Ok::<_, ResourceCreationError>(vec![0_u8; 16]))
///     .name("buffers")
///     .config(config)
///     .health_check(|buffer: &Vec<u8>| HealthVerdict::from(buffer.len() == 16))
///     .hook(LoadScalingHook::default())
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.name(), "buffers");
/// pool.shutdown();
/// ```
pub struct PoolBuilder<R: Send + Sync + 'static> {
    name: String,
    config: PoolConfiguration,
    factory: Box<dyn ResourceFactory<R>>,
    health_check: Option<Box<dyn HealthCheck<R>>>,
    hook: Arc<dyn PoolManagementHook>,
    events: Arc<dyn EventSink>,
}

impl<R: Send + Sync + 'static> PoolBuilder<R> {
    fn new<F>(factory: F) -> Self
    where
        F: ResourceFactory<R> + 'static,
    {
        Self {
            name: "respool".to_string(),
            config: PoolConfiguration::default(),
            factory: Box::new(factory),
            health_check: None,
            hook: Arc::new(NoopHook),
            events: Arc::new(TracingSink),
        }
    }

    /// Name used in logs, events, metrics labels and job thread names
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn config(mut self, config: PoolConfiguration) -> Self {
        self.config = config;
        self
    }

    /// Set the health check used by the health-care job, on access and on
    /// release
    #[must_use]
    pub fn health_check<C>(mut self, check: C) -> Self
    where
        C: HealthCheck<R> + 'static,
    {
        self.health_check = Some(Box::new(check));
        self
    }

    /// Set an asynchronous health check, run on the given tokio runtime and
    /// awaited for at most `health_check_timeout`
    #[must_use]
    pub fn async_health_check<C>(self, runtime: tokio::runtime::Handle, check: C) -> Self
    where
        C: AsyncHealthCheck<R>,
    {
        self.health_check(RuntimeHealthCheck::new(check, runtime))
    }

    #[must_use]
    pub fn hook<H>(mut self, hook: H) -> Self
    where
        H: PoolManagementHook + 'static,
    {
        self.hook = Arc::new(hook);
        self
    }

    /// Route pool events somewhere other than `tracing`
    #[must_use]
    pub fn event_sink<S>(mut self, sink: S) -> Self
    where
        S: EventSink + 'static,
    {
        self.events = Arc::new(sink);
        self
    }

    /// Validate the configuration and start the enabled background jobs
    pub fn build(self) -> PoolResult<Pool<R>> {
        self.config.validate()?;
        if self.config.needs_health_check() && self.health_check.is_none() {
            return Err(PoolError::InvalidConfiguration(
                "the health-care job, invalidate_resource_on_access and validate_on_release \
                 need a health check"
                    .to_string(),
            ));
        }

        let config = self.config.clone();
        let core = Arc::new(PoolCore::new(
            self.name,
            self.config,
            self.factory,
            self.health_check,
            self.hook,
            self.events,
        ));
        let mut pool = Pool {
            core,
            count_keeper: None,
            health_care: None,
        };

        if config.enable_count_keeper {
            let signal = Arc::new(JobSignal::new());
            let keeper = ResourceCountKeeper::new(Arc::clone(&pool.core), Arc::clone(&signal));
            let handle = JobHandle::spawn("count-keeper", pool.core.name(), move || keeper.run())?;
            pool.count_keeper = Some(Job { signal, handle });
        }

        if config.enable_health_care_job {
            let signal = Arc::new(JobSignal::new());
            let keeper_signal = pool.count_keeper.as_ref().map(|job| Arc::clone(&job.signal));
            let job =
                HealthCareJob::new(Arc::clone(&pool.core), Arc::clone(&signal), keeper_signal);
            let handle = JobHandle::spawn("health-care", pool.core.name(), move || job.run())?;
            pool.health_care = Some(Job { signal, handle });
        }

        tracing::info!(
            pool = pool.core.name(),
            min = config.min_count,
            desired = config.desired_count,
            max = config.max_count,
            count_keeper = config.enable_count_keeper,
            health_care = config.enable_health_care_job,
            "resource pool created"
        );

        Ok(pool)
    }
}
