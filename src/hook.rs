//! Extension point for pool management policies

use crate::status::PoolStatus;

/// The capability set a management hook gets to work with.
///
/// Implemented by the pool itself; hooks receive it as a trait object so
/// they stay independent of the resource type.
pub trait PoolControl {
    fn status(&self) -> PoolStatus;

    fn desired_count(&self) -> usize;

    /// Move the count keeper target, clamped to `[min, max]`.
    /// Returns the value actually applied.
    fn set_desired_count(&self, desired: usize) -> usize;
}

/// User-supplied pool policy, e.g. load-based scaling.
///
/// Every callback runs without the pool lock held. Callbacks fire on the
/// thread that caused them: `on_acquired`/`on_exhausted` on the acquiring
/// thread, `on_released` where the last handle clone was dropped and
/// `on_maintenance` on the count keeper thread before each cycle.
pub trait PoolManagementHook: Send + Sync {
    fn on_acquired(&self, _pool: &dyn PoolControl) {}

    fn on_released(&self, _pool: &dyn PoolControl) {}

    fn on_exhausted(&self, _pool: &dyn PoolControl) {}

    fn on_maintenance(&self, _pool: &dyn PoolControl) {}
}

/// The default hook: does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl PoolManagementHook for NoopHook {}

/// Watermark-based scaling of the desired count.
///
/// On every maintenance cycle the target moves up by `step` when
/// utilization of the live resources is above `high_watermark`, and down by
/// `step` when it is below `low_watermark`. Exhaustion also raises the
/// target immediately, so the count keeper pre-creates for the next burst.
///
/// # Examples
///
/// ```
/// use esox_respool::LoadScalingHook;
///
/// let hook = LoadScalingHook::new(0.8, 0.2).with_step(2);
/// assert_eq!(hook.step(), 2);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LoadScalingHook {
    high_watermark: f64,
    low_watermark: f64,
    step: usize,
}

impl LoadScalingHook {
    pub fn new(high_watermark: f64, low_watermark: f64) -> Self {
        Self {
            high_watermark,
            low_watermark: low_watermark.min(high_watermark),
            step: 1,
        }
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step.max(1);
        self
    }

    pub fn step(&self) -> usize {
        self.step
    }

    fn load(status: &PoolStatus) -> f64 {
        let live = status.live();
        if live == 0 {
            return 0.0;
        }
        status.in_use as f64 / live as f64
    }
}

impl Default for LoadScalingHook {
    fn default() -> Self {
        Self::new(0.75, 0.25)
    }
}

impl PoolManagementHook for LoadScalingHook {
    fn on_exhausted(&self, pool: &dyn PoolControl) {
        pool.set_desired_count(pool.desired_count().saturating_add(self.step));
    }

    fn on_maintenance(&self, pool: &dyn PoolControl) {
        let status = pool.status();
        let load = Self::load(&status);
        let desired = pool.desired_count();

        if load > self.high_watermark {
            let applied = pool.set_desired_count(desired.saturating_add(self.step));
            if applied != desired {
                tracing::debug!(load, desired = applied, "scaling pool up");
            }
        } else if load < self.low_watermark && status.live() > 0 {
            let applied = pool.set_desired_count(desired.saturating_sub(self.step));
            if applied != desired {
                tracing::debug!(load, desired = applied, "scaling pool down");
            }
        }
    }
}
