//! Point-in-time status of a resource pool

/// Snapshot of the slot table and count targets
///
/// # Examples
///
/// ```
/// use esox_respool::PoolStatus;
///
/// let status = PoolStatus {
///     idle: 0,
///     in_use: 10,
///     pending_health_check: 0,
///     creating: 0,
///     desired: 10,
///     min: 2,
///     max: 10,
/// };
///
/// assert!(status.is_at_capacity());
/// assert!(!status.is_healthy());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolStatus {
    /// Resources available for acquisition
    pub idle: usize,
    /// Resources held by callers
    pub in_use: usize,
    /// Idle resources currently being checked by the health-care job
    pub pending_health_check: usize,
    /// Factory calls in flight
    pub creating: usize,
    /// Current count keeper target
    pub desired: usize,
    /// Lower bound for the target
    pub min: usize,
    /// Hard upper bound on live resources
    pub max: usize,
}

impl PoolStatus {
    /// All resources that exist or are being created
    pub fn live(&self) -> usize {
        self.idle + self.in_use + self.pending_health_check + self.creating
    }

    /// Share of capacity held by callers (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        self.in_use as f64 / self.max as f64
    }

    pub fn is_at_capacity(&self) -> bool {
        self.live() >= self.max
    }

    /// Conditions worth a look from an operator
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.utilization() > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", self.utilization() * 100.0));
        }

        if self.idle == 0 && self.is_at_capacity() {
            warnings.push("No idle resources and pool at capacity".to_string());
        }

        if self.live() < self.min {
            warnings.push(format!(
                "Below minimum: {} live of {} required",
                self.live(),
                self.min
            ));
        }

        warnings
    }

    pub fn is_healthy(&self) -> bool {
        self.warnings().is_empty()
    }
}
