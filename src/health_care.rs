//! Background job that health-checks idle resources and replaces failures

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::errors::{HealthCheckError, ResourceCreationError, panic_message};
use crate::events::{CreationOrigin, DestroyReason, PoolEvent};
use crate::health::HealthVerdict;
use crate::hook::PoolControl;
use crate::metrics::MetricsTracker;
use crate::pool_core::{PoolCore, Reservation};
use crate::signal::{JobSignal, Wake};
use crate::slot::SlotState;

/// Why a health-care cycle could not finish
#[derive(Error, Debug)]
pub(crate) enum HealthCareFailure {
    /// Checks that produced no verdict; the first error is kept
    #[error("{first} ({count} check(s) failed to run this cycle)")]
    Check {
        #[source]
        first: HealthCheckError,
        count: usize,
    },

    #[error(transparent)]
    Replacement(#[from] ResourceCreationError),

    #[error("health-care cycle panicked: {0}")]
    Panicked(String),
}

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CycleReport {
    pub checked: usize,
    pub unhealthy: usize,
    pub expired: usize,
    pub replaced: usize,
}

pub(crate) struct HealthCareJob<R: Send + Sync + 'static> {
    core: Arc<PoolCore<R>>,
    signal: Arc<JobSignal>,
    /// Signal of the count keeper, when it runs; replacements go through it
    keeper: Option<Arc<JobSignal>>,
}

impl<R: Send + Sync + 'static> HealthCareJob<R> {
    pub fn new(
        core: Arc<PoolCore<R>>,
        signal: Arc<JobSignal>,
        keeper: Option<Arc<JobSignal>>,
    ) -> Self {
        Self {
            core,
            signal,
            keeper,
        }
    }

    /// Job body: one cycle per interval until stopped
    pub fn run(self) {
        let config = self.core.config();
        let (interval, increment) = (config.health_check_interval, config.wait_increment);
        tracing::debug!(pool = self.core.name(), ?interval, "health-care job started");

        while self.signal.wait(interval, increment) != Wake::Stopped {
            if let Err(failure) = self.guarded_cycle() {
                self.on_failure(&failure);
            }
        }

        tracing::debug!(pool = self.core.name(), "health-care job stopped");
    }

    fn should_stop(&self) -> bool {
        self.signal.is_stopped() || self.core.is_closed()
    }

    /// One cycle with panics turned into a failure, so the job thread
    /// survives them
    pub fn guarded_cycle(&self) -> Result<CycleReport, HealthCareFailure> {
        panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle())).unwrap_or_else(|payload| {
            Err(HealthCareFailure::Panicked(panic_message(payload.as_ref())))
        })
    }

    /// Evict expired resources, then check every idle one. A check that
    /// errors leaves its resource idle and does not stop the batch.
    pub fn run_cycle(&self) -> Result<CycleReport, HealthCareFailure> {
        let mut report = CycleReport::default();
        if self.should_stop() {
            return Ok(report);
        }

        report.expired = self.evict_expired();

        let fatal = self.core.config().terminate_on_health_care_job_failure;
        let mut first_error = None;
        let mut errors = 0;
        let candidates = self.core.lock().idle_ids();
        for id in candidates {
            if self.should_stop() {
                break;
            }
            // claimed by an acquirer since the snapshot
            let Some(resource) = self.core.lock().claim_for_check(id) else {
                continue;
            };

            let verdict = self.core.probe(&resource);
            report.checked += 1;

            let mut table = self.core.lock();
            match verdict {
                Ok(HealthVerdict::Healthy) => {
                    if let Some(slot) = table.get_mut(id)
                        && slot.state == SlotState::PendingHealthCheck
                    {
                        slot.state = SlotState::Idle;
                        slot.last_health_check = Some(Instant::now());
                    }
                }
                Ok(HealthVerdict::Unhealthy { reason }) => {
                    let removed = table.invalidate(id);
                    drop(table);
                    report.unhealthy += 1;
                    self.core.emit(PoolEvent::HealthCheckFailed { slot: id, reason });
                    self.core.destroy(removed, DestroyReason::Unhealthy);
                }
                Err(error) => {
                    if let Some(slot) = table.get_mut(id)
                        && slot.state == SlotState::PendingHealthCheck
                    {
                        slot.state = SlotState::Idle;
                    }
                    drop(table);
                    tracing::warn!(
                        pool = self.core.name(),
                        slot = id,
                        error = %error,
                        "health check produced no verdict"
                    );
                    errors += 1;
                    first_error.get_or_insert(error);
                    if fatal {
                        break;
                    }
                }
            }
        }

        if report.unhealthy + report.expired > 0 {
            report.replaced = self.replenish()?;
        }

        if report != CycleReport::default() {
            tracing::trace!(
                pool = self.core.name(),
                checked = report.checked,
                unhealthy = report.unhealthy,
                expired = report.expired,
                replaced = report.replaced,
                "health-care cycle"
            );
        }

        match first_error {
            Some(first) => Err(HealthCareFailure::Check {
                first,
                count: errors,
            }),
            None => Ok(report),
        }
    }

    fn evict_expired(&self) -> usize {
        let policy = self.core.config().eviction;
        if !policy.is_enabled() {
            return 0;
        }

        let now = Instant::now();
        let expired = self
            .core
            .lock()
            .remove_idle_where(|slot| policy.is_expired(slot.created_at, slot.last_used, now));
        let count = expired.len();
        MetricsTracker::add(&self.core.metrics.evictions, count);
        self.core.destroy(expired, DestroyReason::Expired);
        count
    }

    /// Bring the pool back to its desired count after removals. Delegated to
    /// the count keeper when it runs; returns how many were created inline.
    fn replenish(&self) -> Result<usize, ResourceCreationError> {
        if let Some(keeper) = &self.keeper {
            keeper.nudge();
            return Ok(0);
        }

        let desired = self.core.desired_count();
        let granted = {
            let mut table = self.core.lock();
            let live = table.live();
            table.reserve(desired.saturating_sub(live), self.core.config().max_count)
        };

        let mut reservations: Vec<_> = (0..granted)
            .map(|_| Reservation::adopt(&self.core))
            .collect();
        let mut created = 0;
        while let Some(reservation) = reservations.pop() {
            if self.should_stop() {
                break;
            }
            let replacement = self.core.create_resource(
                reservation,
                SlotState::Idle,
                CreationOrigin::HealthCareJob,
            )?;
            if replacement.is_none() {
                break;
            }
            created += 1;
        }
        Ok(created)
    }

    fn on_failure(&self, failure: &HealthCareFailure) {
        self.core.emit(PoolEvent::HealthCareJobFailure {
            error: failure.to_string(),
        });
        if self.core.config().terminate_on_health_care_job_failure {
            tracing::error!(
                pool = self.core.name(),
                "health-care job failure is configured as fatal, aborting"
            );
            std::process::abort();
        }
    }
}
