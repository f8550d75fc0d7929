//! Metrics collection and export for resource pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::status::PoolStatus;

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use esox_respool::{Pool, PoolConfiguration, ResourceCreationError};
///
/// let pool = Pool::builder(|| Ok::<_, ResourceCreationError>(7_u32))
///     .config(PoolConfiguration::new().without_count_keeper())
///     .build()
///     .unwrap();
///
/// {
///     let _resource = pool.acquire().unwrap();
///     let metrics = pool.metrics();
///     assert_eq!(metrics.total_acquired, 1);
///     assert_eq!(metrics.in_use, 1);
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Resources produced by the factory
    pub total_created: u64,

    /// Resources removed from the pool
    pub total_destroyed: u64,

    /// Successful acquisitions
    pub total_acquired: u64,

    /// Handles returned to the pool
    pub total_released: u64,

    /// Acquisitions refused because the pool was exhausted
    pub exhausted_events: u64,

    /// Factory calls that failed
    pub creation_failures: u64,

    /// Health checks that produced a verdict
    pub health_checks: u64,

    /// Health checks with an unhealthy verdict
    pub health_check_failures: u64,

    /// Health checks that could not run at all
    pub health_check_errors: u64,

    /// Resources expired by the eviction policy
    pub evictions: u64,

    /// Current idle resources
    pub idle: usize,

    /// Current resources in use
    pub in_use: usize,

    /// Maximum pool capacity
    pub max_count: usize,

    /// Pool utilization ratio (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("exhausted_events".to_string(), self.exhausted_events.to_string());
        metrics.insert("creation_failures".to_string(), self.creation_failures.to_string());
        metrics.insert("health_checks".to_string(), self.health_checks.to_string());
        metrics.insert(
            "health_check_failures".to_string(),
            self.health_check_failures.to_string(),
        );
        metrics.insert(
            "health_check_errors".to_string(),
            self.health_check_errors.to_string(),
        );
        metrics.insert("evictions".to_string(), self.evictions.to_string());
        metrics.insert("idle".to_string(), self.idle.to_string());
        metrics.insert("in_use".to_string(), self.in_use.to_string());
        metrics.insert("max_count".to_string(), self.max_count.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_respool::{MetricsExporter, Pool, PoolConfiguration, ResourceCreationError};
    /// use std::collections::HashMap;
    ///
    /// let pool = Pool::builder(|| Ok::<_, ResourceCreationError>(1_u8))
    ///     .config(PoolConfiguration::new().without_count_keeper())
    ///     .build()
    ///     .unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output =
    ///     MetricsExporter::export_prometheus(&pool.metrics(), "db", Some(&tags)).unwrap();
    /// assert!(output.contains("respool_resources_in_use"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());
        if let Some(tags) = tags {
            labels.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let registry = Registry::new_custom(Some("respool".to_string()), Some(labels))?;

        let gauges = [
            ("resources_idle", "Current idle resources", metrics.idle),
            ("resources_in_use", "Current resources in use", metrics.in_use),
            ("resources_max", "Maximum pool capacity", metrics.max_count),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(Opts::new(name, help))?;
            gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
            registry.register(Box::new(gauge))?;
        }

        let utilization = Gauge::with_opts(Opts::new("utilization", "Pool utilization ratio"))?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization))?;

        let counters = [
            ("resources_created_total", "Resources created", metrics.total_created),
            ("resources_destroyed_total", "Resources destroyed", metrics.total_destroyed),
            ("acquired_total", "Successful acquisitions", metrics.total_acquired),
            ("released_total", "Released handles", metrics.total_released),
            ("exhausted_total", "Acquisitions refused", metrics.exhausted_events),
            ("creation_failures_total", "Factory failures", metrics.creation_failures),
            ("health_checks_total", "Health checks with a verdict", metrics.health_checks),
            (
                "health_check_failures_total",
                "Unhealthy verdicts",
                metrics.health_check_failures,
            ),
            (
                "health_check_errors_total",
                "Health checks that failed to run",
                metrics.health_check_errors,
            ),
            ("evictions_total", "Resources expired", metrics.evictions),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(Opts::new(name, help))?;
            counter.inc_by(value);
            registry.register(Box::new(counter))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub total_created: AtomicU64,
    pub total_destroyed: AtomicU64,
    pub total_acquired: AtomicU64,
    pub total_released: AtomicU64,
    pub exhausted_events: AtomicU64,
    pub creation_failures: AtomicU64,
    pub health_checks: AtomicU64,
    pub health_check_failures: AtomicU64,
    pub health_check_errors: AtomicU64,
    pub evictions: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, amount: usize) {
        counter.fetch_add(amount as u64, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, status: &PoolStatus) -> PoolMetrics {
        PoolMetrics {
            total_created: self.total_created.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            exhausted_events: self.exhausted_events.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            health_checks: self.health_checks.load(Ordering::Relaxed),
            health_check_failures: self.health_check_failures.load(Ordering::Relaxed),
            health_check_errors: self.health_check_errors.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            idle: status.idle,
            in_use: status.in_use,
            max_count: status.max,
            utilization: status.utilization(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> PoolStatus {
        PoolStatus {
            idle: 1,
            in_use: 3,
            pending_health_check: 0,
            creating: 0,
            desired: 4,
            min: 0,
            max: 4,
        }
    }

    #[test]
    fn test_tracker_snapshot() {
        let tracker = MetricsTracker::new();
        MetricsTracker::bump(&tracker.total_created);
        MetricsTracker::add(&tracker.total_destroyed, 3);

        let metrics = tracker.get_metrics(&status());
        assert_eq!(metrics.total_created, 1);
        assert_eq!(metrics.total_destroyed, 3);
        assert!((metrics.utilization - 0.75).abs() < f64::EPSILON);

        let exported = metrics.export();
        assert_eq!(exported["utilization"], "0.75");
        assert_eq!(exported["in_use"], "3");
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_export() {
        let tracker = MetricsTracker::new();
        MetricsTracker::add(&tracker.total_acquired, 12);

        let output =
            MetricsExporter::export_prometheus(&tracker.get_metrics(&status()), "db", None)
                .unwrap();
        assert!(output.contains("respool_acquired_total{pool=\"db\"} 12"));
        assert!(output.contains("# TYPE respool_resources_in_use gauge"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_snapshot_is_serializable() {
        fn assert_serialize<T: serde::Serialize>() {}
        assert_serialize::<PoolMetrics>();
        assert_serialize::<PoolStatus>();
    }
}
