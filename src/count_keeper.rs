//! Background job converging the pool toward its desired resource count

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;

use crate::errors::{ResourceCreationError, panic_message};
use crate::events::{CreationOrigin, DestroyReason, PoolEvent};
use crate::hook::PoolControl;
use crate::pool_core::{PoolCore, Reservation};
use crate::signal::{JobSignal, Wake};
use crate::slot::SlotState;

/// Why a count keeper cycle could not finish
#[derive(Error, Debug)]
pub(crate) enum KeeperFailure {
    #[error(transparent)]
    Creation(#[from] ResourceCreationError),

    #[error("count keeper cycle panicked: {0}")]
    Panicked(String),
}

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CycleReport {
    pub created: usize,
    pub destroyed: usize,
}

pub(crate) struct ResourceCountKeeper<R: Send + Sync + 'static> {
    core: Arc<PoolCore<R>>,
    signal: Arc<JobSignal>,
}

impl<R: Send + Sync + 'static> ResourceCountKeeper<R> {
    pub fn new(core: Arc<PoolCore<R>>, signal: Arc<JobSignal>) -> Self {
        Self { core, signal }
    }

    /// Job body: one cycle right away, then one per interval until stopped
    pub fn run(self) {
        let config = self.core.config();
        let (interval, increment) = (config.count_keeper_interval, config.wait_increment);
        tracing::debug!(pool = self.core.name(), ?interval, "count keeper started");

        loop {
            if let Err(failure) = self.guarded_cycle() {
                self.on_failure(&failure);
            }
            if self.signal.wait(interval, increment) == Wake::Stopped {
                break;
            }
        }

        tracing::debug!(pool = self.core.name(), "count keeper stopped");
    }

    fn should_stop(&self) -> bool {
        self.signal.is_stopped() || self.core.is_closed()
    }

    /// One cycle with panics from the hook or resource drops turned into a
    /// failure, so the keeper thread survives them
    pub fn guarded_cycle(&self) -> Result<CycleReport, KeeperFailure> {
        panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle())).unwrap_or_else(|payload| {
            Err(KeeperFailure::Panicked(panic_message(payload.as_ref())))
        })
    }

    /// Grow toward or shrink to the desired count
    pub fn run_cycle(&self) -> Result<CycleReport, KeeperFailure> {
        if self.should_stop() {
            return Ok(CycleReport::default());
        }
        self.core.hook().on_maintenance(self.core.as_ref());

        let desired = self.core.desired_count();
        let max = self.core.config().max_count;
        let (granted, surplus) = {
            let mut table = self.core.lock();
            let live = table.live();
            if live < desired {
                (table.reserve(desired - live, max), Vec::new())
            } else {
                (0, table.remove_idle_lru(live - desired))
            }
        };

        let mut report = CycleReport {
            created: 0,
            destroyed: surplus.len(),
        };
        self.core.destroy(surplus, DestroyReason::Surplus);

        let mut reservations: Vec<_> = (0..granted)
            .map(|_| Reservation::adopt(&self.core))
            .collect();
        while let Some(reservation) = reservations.pop() {
            if self.should_stop() {
                break;
            }
            let created = self.core.create_resource(
                reservation,
                SlotState::Idle,
                CreationOrigin::CountKeeper,
            )?;
            if created.is_none() {
                break;
            }
            report.created += 1;
        }

        if report != CycleReport::default() {
            tracing::trace!(
                pool = self.core.name(),
                created = report.created,
                destroyed = report.destroyed,
                "count keeper cycle"
            );
        }
        Ok(report)
    }

    fn on_failure(&self, failure: &KeeperFailure) {
        self.core.emit(PoolEvent::CountKeeperFailure {
            error: failure.to_string(),
        });
        if self.core.config().terminate_on_count_keeper_failure {
            tracing::error!(
                pool = self.core.name(),
                "count keeper failure is configured as fatal, aborting"
            );
            std::process::abort();
        }
    }
}
