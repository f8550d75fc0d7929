//! Pool configuration options

use std::time::Duration;

use crate::errors::{PoolError, PoolResult};
use crate::eviction::EvictionPolicy;

/// Configuration for resource pool behavior.
///
/// Built once and immutable after the pool is constructed. The only value
/// that moves at runtime is the desired count, which management hooks may
/// adjust within `[min_count, max_count]`.
///
/// # Examples
///
/// ```
/// use esox_respool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_counts(2, 4, 10)
///     .with_count_keeper_interval(Duration::from_secs(5))
///     .with_health_check_interval(Duration::from_secs(30));
///
/// assert_eq!(config.desired_count, 4);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfiguration {
    /// Lower bound for the desired count
    pub min_count: usize,

    /// Number of resources the count keeper converges toward
    pub desired_count: usize,

    /// Hard upper bound on live resources (idle, in use, being checked or created)
    pub max_count: usize,

    /// Whether the background count keeper runs
    pub enable_count_keeper: bool,

    /// Time between count keeper cycles
    pub count_keeper_interval: Duration,

    /// Abort the process when a count keeper cycle fails
    pub terminate_on_count_keeper_failure: bool,

    /// Whether the background health-care job runs
    pub enable_health_care_job: bool,

    /// Time between health-care cycles
    pub health_check_interval: Duration,

    /// How long to wait for a pending (asynchronous) health check
    pub health_check_timeout: Duration,

    /// Abort the process when the health check mechanism itself fails
    pub terminate_on_health_care_job_failure: bool,

    /// Health-check every resource right before handing it out
    pub invalidate_resource_on_access: bool,

    /// Health-check resources when they are released
    pub validate_on_release: bool,

    /// Upper bound on a single sleep step of the background jobs
    pub wait_increment: Duration,

    /// Eviction of idle resources by age, applied by the health-care job
    pub eviction: EvictionPolicy,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            min_count: 0,
            desired_count: 0,
            max_count: 10,
            enable_count_keeper: true,
            count_keeper_interval: Duration::from_secs(1),
            terminate_on_count_keeper_failure: false,
            enable_health_care_job: false,
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            terminate_on_health_care_job_failure: false,
            invalidate_resource_on_access: false,
            validate_on_release: false,
            wait_increment: Duration::from_millis(100),
            eviction: EvictionPolicy::None,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set min, desired and max counts in one go
    pub fn with_counts(mut self, min: usize, desired: usize, max: usize) -> Self {
        self.min_count = min;
        self.desired_count = desired;
        self.max_count = max;
        self
    }

    /// Set the maximum number of live resources
    pub fn with_max_count(mut self, max: usize) -> Self {
        self.max_count = max;
        self
    }

    /// Enable the count keeper with the given cycle interval
    pub fn with_count_keeper_interval(mut self, interval: Duration) -> Self {
        self.enable_count_keeper = true;
        self.count_keeper_interval = interval;
        self
    }

    /// Disable the count keeper; `acquire` alone grows the pool
    pub fn without_count_keeper(mut self) -> Self {
        self.enable_count_keeper = false;
        self
    }

    /// Treat count keeper failures as fatal to the process
    pub fn with_terminate_on_count_keeper_failure(mut self, terminate: bool) -> Self {
        self.terminate_on_count_keeper_failure = terminate;
        self
    }

    /// Enable the health-care job with the given cycle interval
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_respool::PoolConfiguration;
    /// use std::time::Duration;
    ///
    /// let config = PoolConfiguration::new()
    ///     .with_health_check_interval(Duration::from_secs(10));
    ///
    /// assert!(config.enable_health_care_job);
    /// ```
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.enable_health_care_job = true;
        self.health_check_interval = interval;
        self
    }

    /// Set the timeout for pending health checks
    pub fn with_health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    /// Treat health check mechanism failures as fatal to the process
    pub fn with_terminate_on_health_care_job_failure(mut self, terminate: bool) -> Self {
        self.terminate_on_health_care_job_failure = terminate;
        self
    }

    /// Health-check resources on acquisition
    pub fn with_invalidate_on_access(mut self, enabled: bool) -> Self {
        self.invalidate_resource_on_access = enabled;
        self
    }

    /// Health-check resources on release
    pub fn with_validate_on_release(mut self, enabled: bool) -> Self {
        self.validate_on_release = enabled;
        self
    }

    /// Set the sleep step bounding shutdown latency of the background jobs
    pub fn with_wait_increment(mut self, increment: Duration) -> Self {
        self.wait_increment = increment;
        self
    }

    /// Set time-to-live for resources
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.eviction = self.eviction.with_ttl(ttl);
        self
    }

    /// Set idle timeout for resources
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.eviction = self.eviction.with_idle_timeout(timeout);
        self
    }

    /// Check the static preconditions of the configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_respool::PoolConfiguration;
    ///
    /// // invalidating on access needs the health-care job to exist
    /// let config = PoolConfiguration::new().with_invalidate_on_access(true);
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_count == 0 {
            return invalid("max_count must be at least 1");
        }
        if self.min_count > self.max_count {
            return invalid(format!(
                "min_count ({}) exceeds max_count ({})",
                self.min_count, self.max_count
            ));
        }
        if self.desired_count < self.min_count || self.desired_count > self.max_count {
            return invalid(format!(
                "desired_count ({}) must lie within [{}, {}]",
                self.desired_count, self.min_count, self.max_count
            ));
        }
        if self.invalidate_resource_on_access && !self.enable_health_care_job {
            return invalid("invalidate_resource_on_access requires the health-care job");
        }
        if self.enable_count_keeper && self.count_keeper_interval.is_zero() {
            return invalid("count_keeper_interval must be non-zero");
        }
        if self.enable_health_care_job && self.health_check_interval.is_zero() {
            return invalid("health_check_interval must be non-zero");
        }
        if self.health_check_timeout.is_zero() {
            return invalid("health_check_timeout must be non-zero");
        }
        if self.wait_increment.is_zero() {
            return invalid("wait_increment must be non-zero");
        }
        Ok(())
    }

    /// Whether any configured path needs a health check to be supplied
    pub(crate) fn needs_health_check(&self) -> bool {
        self.enable_health_care_job
            || self.invalidate_resource_on_access
            || self.validate_on_release
    }
}

fn invalid<T>(message: impl Into<String>) -> PoolResult<T> {
    Err(PoolError::InvalidConfiguration(message.into()))
}
