//! Slot table ownership, acquisition and release

use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};

use crate::config::PoolConfiguration;
use crate::errors::{HealthCheckError, PoolError, PoolResult, ResourceCreationError};
use crate::events::{CreationOrigin, DestroyReason, EventSink, PoolEvent};
use crate::health::{HealthCheck, HealthProbe, HealthVerdict};
use crate::hook::{PoolControl, PoolManagementHook};
use crate::metrics::MetricsTracker;
use crate::slot::{ResourceSlot, SlotId, SlotState, SlotTable};
use crate::status::PoolStatus;

/// Produces new resources for the pool.
///
/// Any `Fn() -> Result<R, ResourceCreationError>` closure is a factory.
/// The pool never holds its lock while the factory runs.
pub trait ResourceFactory<R>: Send + Sync {
    fn create(&self) -> Result<R, ResourceCreationError>;
}

impl<R, F> ResourceFactory<R> for F
where
    F: Fn() -> Result<R, ResourceCreationError> + Send + Sync,
{
    fn create(&self) -> Result<R, ResourceCreationError> {
        self()
    }
}

/// Shared state of one pool: the slot table and its collaborators
pub(crate) struct PoolCore<R: Send + Sync + 'static> {
    name: String,
    config: PoolConfiguration,
    factory: Box<dyn ResourceFactory<R>>,
    health_check: Option<Box<dyn HealthCheck<R>>>,
    hook: Arc<dyn PoolManagementHook>,
    events: Arc<dyn EventSink>,
    slots: Mutex<SlotTable<R>>,
    desired: AtomicUsize,
    closed: AtomicBool,
    pub(crate) metrics: MetricsTracker,
}

enum Claim<R> {
    Existing(SlotId, Arc<R>),
    Create,
    Exhausted,
}

impl<R: Send + Sync + 'static> PoolCore<R> {
    pub fn new(
        name: String,
        config: PoolConfiguration,
        factory: Box<dyn ResourceFactory<R>>,
        health_check: Option<Box<dyn HealthCheck<R>>>,
        hook: Arc<dyn PoolManagementHook>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let desired = config.desired_count;
        Self {
            name,
            config,
            factory,
            health_check,
            hook,
            events,
            slots: Mutex::new(SlotTable::new()),
            desired: AtomicUsize::new(desired),
            closed: AtomicBool::new(false),
            metrics: MetricsTracker::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.config
    }

    pub fn hook(&self) -> &dyn PoolManagementHook {
        self.hook.as_ref()
    }

    pub fn lock(&self) -> MutexGuard<'_, SlotTable<R>> {
        self.slots.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn emit(&self, event: PoolEvent) {
        self.events.record(&self.name, &event);
    }

    /// Hand out an idle resource, or create one when below `max_count`
    pub fn acquire(self: &Arc<Self>) -> PoolResult<PooledResource<R>> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        // fresh resources failing their access check, bounded so a factory
        // that only yields broken resources cannot spin forever
        let mut rejected_fresh = 0;
        loop {
            let claim = {
                let mut table = self.lock();
                if let Some((id, resource)) = table.claim_idle() {
                    Claim::Existing(id, resource)
                } else if table.reserve(1, self.config.max_count) == 1 {
                    Claim::Create
                } else {
                    Claim::Exhausted
                }
            };

            match claim {
                Claim::Existing(id, resource) => {
                    if self.config.invalidate_resource_on_access
                        && !self.verify_claimed(id, &resource)
                    {
                        continue;
                    }
                    return Ok(self.hand_out(id, resource));
                }
                Claim::Create => {
                    let reservation = Reservation::adopt(self);
                    let (id, resource) = match self.create_resource(
                        reservation,
                        SlotState::InUse,
                        CreationOrigin::Acquire,
                    ) {
                        Ok(Some(created)) => created,
                        Ok(None) => return Err(PoolError::Closed),
                        Err(_) => return Err(self.exhausted()),
                    };
                    if self.config.invalidate_resource_on_access
                        && !self.verify_claimed(id, &resource)
                    {
                        rejected_fresh += 1;
                        if rejected_fresh >= self.config.max_count {
                            return Err(self.exhausted());
                        }
                        continue;
                    }
                    return Ok(self.hand_out(id, resource));
                }
                Claim::Exhausted => return Err(self.exhausted()),
            }
        }
    }

    fn hand_out(self: &Arc<Self>, id: SlotId, resource: Arc<R>) -> PooledResource<R> {
        MetricsTracker::bump(&self.metrics.total_acquired);
        self.hook.on_acquired(self.as_ref());
        PooledResource::new(Arc::clone(self), id, resource)
    }

    fn exhausted(&self) -> PoolError {
        let in_use = self.lock().count(SlotState::InUse);
        let max = self.config.max_count;
        MetricsTracker::bump(&self.metrics.exhausted_events);
        self.emit(PoolEvent::PoolExhausted { in_use, max });
        self.hook.on_exhausted(self);
        PoolError::Exhausted { in_use, max }
    }

    /// Health-check a slot the caller has already claimed. On failure the
    /// slot is invalidated and its resource destroyed.
    fn verify_claimed(&self, id: SlotId, resource: &Arc<R>) -> bool {
        let reason = match self.probe(resource) {
            Ok(HealthVerdict::Healthy) => {
                if let Some(slot) = self.lock().get_mut(id) {
                    slot.last_health_check = Some(Instant::now());
                }
                return true;
            }
            Ok(HealthVerdict::Unhealthy { reason }) => reason,
            Err(error) => error.to_string(),
        };

        self.emit(PoolEvent::HealthCheckFailed { slot: id, reason });
        let removed = self.lock().invalidate(id);
        self.destroy(removed, DestroyReason::Unhealthy);
        false
    }

    /// Run the factory and commit the result into the reserved slot.
    ///
    /// Returns `Ok(None)` when the pool closed while the factory ran; the
    /// new resource is dropped instead of entering the drained table.
    pub fn create_resource(
        &self,
        reservation: Reservation<'_, R>,
        state: SlotState,
        origin: CreationOrigin,
    ) -> Result<Option<(SlotId, Arc<R>)>, ResourceCreationError> {
        let created = match origin {
            // panics on the caller's own thread propagate to the caller
            CreationOrigin::Acquire => self.factory.create(),
            CreationOrigin::CountKeeper | CreationOrigin::HealthCareJob => {
                panic::catch_unwind(AssertUnwindSafe(|| self.factory.create()))
                    .unwrap_or_else(|payload| Err(ResourceCreationError::panicked(payload)))
            }
        };

        match created {
            Ok(resource) => {
                let resource = Arc::new(resource);
                let Some(id) = reservation.commit(Arc::clone(&resource), state) else {
                    tracing::debug!(
                        pool = self.name(),
                        ?origin,
                        "pool closed during creation, dropping resource"
                    );
                    return Ok(None);
                };
                MetricsTracker::bump(&self.metrics.total_created);
                self.emit(PoolEvent::ResourceCreated { slot: id, origin });
                Ok(Some((id, resource)))
            }
            Err(error) => {
                drop(reservation);
                MetricsTracker::bump(&self.metrics.creation_failures);
                self.emit(PoolEvent::ResourceCreationFailed {
                    origin,
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// Run the configured health check and wait for its verdict.
    ///
    /// A pending check that times out counts as an unhealthy verdict; any
    /// other failure to produce a verdict is returned as an error.
    pub fn probe(&self, resource: &Arc<R>) -> Result<HealthVerdict, HealthCheckError> {
        let Some(check) = &self.health_check else {
            return Ok(HealthVerdict::Healthy);
        };

        let probe = panic::catch_unwind(AssertUnwindSafe(|| check.check(resource)))
            .unwrap_or_else(|payload| HealthProbe::failed(HealthCheckError::panicked(payload)));

        let result = match probe.wait(self.config.health_check_timeout) {
            Err(HealthCheckError::TimedOut(timeout)) => Ok(HealthVerdict::unhealthy(format!(
                "no verdict within {timeout:?}"
            ))),
            other => other,
        };

        match &result {
            Ok(verdict) => {
                MetricsTracker::bump(&self.metrics.health_checks);
                if !verdict.is_healthy() {
                    MetricsTracker::bump(&self.metrics.health_check_failures);
                }
            }
            Err(_) => MetricsTracker::bump(&self.metrics.health_check_errors),
        }
        result
    }

    /// Record and drop slots that already left the table. Must be called
    /// without the lock held: dropping a resource runs user code.
    pub fn destroy<I>(&self, slots: I, reason: DestroyReason)
    where
        I: IntoIterator<Item = ResourceSlot<R>>,
    {
        for slot in slots {
            MetricsTracker::bump(&self.metrics.total_destroyed);
            self.emit(PoolEvent::ResourceDestroyed {
                slot: slot.id,
                reason,
            });
        }
    }

    fn release(&self, id: SlotId, invalidated: bool, resource: &Arc<R>) {
        let mut destroy_reason = invalidated.then_some(DestroyReason::Invalidated);

        if destroy_reason.is_none() && self.config.validate_on_release && !self.is_closed() {
            let failure = match self.probe(resource) {
                Ok(HealthVerdict::Healthy) => None,
                Ok(HealthVerdict::Unhealthy { reason }) => Some(reason),
                Err(error) => Some(error.to_string()),
            };
            if let Some(reason) = failure {
                self.emit(PoolEvent::HealthCheckFailed { slot: id, reason });
                destroy_reason = Some(DestroyReason::Unhealthy);
            }
        }

        let removed = {
            let mut table = self.lock();
            if destroy_reason.is_some() {
                table.invalidate(id)
            } else {
                // gone already when the pool was shut down meanwhile
                if let Some(slot) = table.get_mut(id) {
                    debug_assert_eq!(slot.state, SlotState::InUse);
                    slot.state = SlotState::Idle;
                    slot.last_used = Instant::now();
                }
                None
            }
        };

        MetricsTracker::bump(&self.metrics.total_released);
        if let Some(reason) = destroy_reason {
            self.destroy(removed, reason);
        }
        self.hook.on_released(self);
    }

    /// Stop accepting acquisitions
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Empty the slot table. Idle resources are destroyed here; resources in
    /// use live on until their last handle is dropped.
    pub fn drain(&self) {
        let drained = self.lock().drain();
        self.destroy(drained, DestroyReason::Shutdown);
    }
}

impl<R: Send + Sync + 'static> PoolControl for PoolCore<R> {
    fn status(&self) -> PoolStatus {
        let table = self.lock();
        PoolStatus {
            idle: table.count(SlotState::Idle),
            in_use: table.count(SlotState::InUse),
            pending_health_check: table.count(SlotState::PendingHealthCheck),
            creating: table.creating(),
            desired: self.desired_count(),
            min: self.config.min_count,
            max: self.config.max_count,
        }
    }

    fn desired_count(&self) -> usize {
        self.desired.load(Ordering::Relaxed)
    }

    fn set_desired_count(&self, desired: usize) -> usize {
        let clamped = desired.clamp(self.config.min_count, self.config.max_count);
        self.desired.store(clamped, Ordering::Relaxed);
        clamped
    }
}

/// Capacity reserved in the slot table for one factory call.
///
/// Dropping it without committing gives the capacity back, so a failing or
/// panicking factory never leaks reserved capacity.
pub(crate) struct Reservation<'a, R: Send + Sync + 'static> {
    core: &'a PoolCore<R>,
    armed: bool,
}

impl<'a, R: Send + Sync + 'static> Reservation<'a, R> {
    /// Take ownership of a reservation already counted in the table
    pub fn adopt(core: &'a PoolCore<R>) -> Self {
        Self { core, armed: true }
    }

    /// Insert the resource, unless the pool has closed meanwhile. The closed
    /// flag is read under the table lock, so a slot committed here is always
    /// seen by a later `drain`.
    fn commit(mut self, resource: Arc<R>, state: SlotState) -> Option<SlotId> {
        self.armed = false;
        let mut table = self.core.lock();
        if self.core.is_closed() {
            table.unreserve();
            return None;
        }
        Some(table.commit(resource, state))
    }
}

impl<R: Send + Sync + 'static> Drop for Reservation<'_, R> {
    fn drop(&mut self) {
        if self.armed {
            self.core.lock().unreserve();
        }
    }
}

struct Lease<R: Send + Sync + 'static> {
    core: Arc<PoolCore<R>>,
    slot: SlotId,
    resource: Arc<R>,
    invalidated: AtomicBool,
}

impl<R: Send + Sync + 'static> Drop for Lease<R> {
    fn drop(&mut self) {
        self.core.release(
            self.slot,
            self.invalidated.load(Ordering::Acquire),
            &self.resource,
        );
    }
}

/// A resource handed out by the pool.
///
/// Clones share the same lease; the slot goes back to idle when the last
/// clone is dropped.
pub struct PooledResource<R: Send + Sync + 'static> {
    lease: Arc<Lease<R>>,
}

impl<R: Send + Sync + 'static> PooledResource<R> {
    fn new(core: Arc<PoolCore<R>>, slot: SlotId, resource: Arc<R>) -> Self {
        Self {
            lease: Arc::new(Lease {
                core,
                slot,
                resource,
                invalidated: AtomicBool::new(false),
            }),
        }
    }

    pub fn slot_id(&self) -> SlotId {
        self.lease.slot
    }

    /// The shared resource itself
    pub fn resource(&self) -> &Arc<R> {
        &self.lease.resource
    }

    /// Flag the resource as broken: it is destroyed instead of returned
    /// when the last clone of this handle is dropped
    pub fn invalidate(&self) {
        self.lease.invalidated.store(true, Ordering::Release);
    }

    pub fn is_invalidated(&self) -> bool {
        self.lease.invalidated.load(Ordering::Acquire)
    }
}

impl<R: Send + Sync + 'static> Clone for PooledResource<R> {
    fn clone(&self) -> Self {
        Self {
            lease: Arc::clone(&self.lease),
        }
    }
}

impl<R: Send + Sync + 'static> Deref for PooledResource<R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        &self.lease.resource
    }
}

impl<R: Send + Sync + fmt::Debug + 'static> fmt::Debug for PooledResource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResource")
            .field("slot", &self.lease.slot)
            .field("resource", &self.lease.resource)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TracingSink;
    use crate::events::testing::RecordingSink;
    use crate::hook::NoopHook;
    use std::sync::atomic::AtomicU32;

    fn core_with(
        config: PoolConfiguration,
        health_check: Option<Box<dyn HealthCheck<u32>>>,
        events: Arc<dyn EventSink>,
    ) -> Arc<PoolCore<u32>> {
        let counter = Arc::new(AtomicU32::new(0));
        let factory =
            move || Ok::<_, ResourceCreationError>(counter.fetch_add(1, Ordering::SeqCst));
        Arc::new(PoolCore::new(
            "test".to_string(),
            config,
            Box::new(factory),
            health_check,
            Arc::new(NoopHook),
            events,
        ))
    }

    fn simple_core(max: usize) -> Arc<PoolCore<u32>> {
        let config = PoolConfiguration::new()
            .with_counts(0, 0, max)
            .without_count_keeper();
        core_with(config, None, Arc::new(TracingSink))
    }

    #[test]
    fn test_acquire_creates_then_reuses() {
        let core = simple_core(2);

        let first = core.acquire().unwrap();
        let id = first.slot_id();
        assert_eq!(*first, 0);
        drop(first);

        let again = core.acquire().unwrap();
        assert_eq!(again.slot_id(), id);
        assert_eq!(*again, 0);
        assert_eq!(core.status().live(), 1);
    }

    #[test]
    fn test_exhaustion_fails_fast() {
        let core = simple_core(2);
        let _a = core.acquire().unwrap();
        let _b = core.acquire().unwrap();

        let err = core.acquire().unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { in_use: 2, max: 2 }));
    }

    #[test]
    fn test_clones_share_one_lease() {
        let core = simple_core(1);
        let handle = core.acquire().unwrap();
        let clone = handle.clone();

        drop(handle);
        assert_eq!(core.status().in_use, 1);
        drop(clone);
        assert_eq!(core.status().idle, 1);
        assert_eq!(core.metrics.total_released.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_invalidated_handle_is_destroyed() {
        let core = simple_core(1);
        let handle = core.acquire().unwrap();
        handle.invalidate();
        assert!(handle.is_invalidated());
        drop(handle);

        assert_eq!(core.status().live(), 0);
        let next = core.acquire().unwrap();
        assert_eq!(*next, 1);
    }

    #[test]
    fn test_factory_failure_releases_reservation() {
        let config = PoolConfiguration::new().with_counts(0, 0, 1).without_count_keeper();
        let factory = || Err::<u32, _>(ResourceCreationError::new("down"));
        let sink = Arc::new(RecordingSink::default());
        let core = Arc::new(PoolCore::new(
            "failing".to_string(),
            config,
            Box::new(factory),
            None,
            Arc::new(NoopHook),
            sink.clone(),
        ));

        assert!(matches!(core.acquire(), Err(PoolError::Exhausted { .. })));
        assert_eq!(core.status().creating, 0);
        assert_eq!(
            sink.count(|e| matches!(e, PoolEvent::ResourceCreationFailed { .. })),
            1
        );
    }

    fn on_access_config() -> PoolConfiguration {
        PoolConfiguration::new()
            .with_counts(0, 0, 3)
            .without_count_keeper()
            .with_health_check_interval(std::time::Duration::from_secs(60))
            .with_invalidate_on_access(true)
    }

    #[test]
    fn test_invalidate_on_access_replaces_broken_fresh_resource() {
        // resource 0 is broken from the start
        let check = |value: &u32| HealthVerdict::from(*value != 0);
        let sink = Arc::new(RecordingSink::default());
        let core = core_with(on_access_config(), Some(Box::new(check)), sink.clone());

        let healthy = core.acquire().unwrap();
        assert_eq!(*healthy, 1);
        assert_eq!(core.status().live(), 1);

        let checked_at = core.lock().get_mut(healthy.slot_id()).unwrap().last_health_check;
        assert!(checked_at.is_some());
        assert_eq!(
            sink.count(|e| matches!(e, PoolEvent::HealthCheckFailed { .. })),
            1
        );
        assert_eq!(
            sink.count(|e| matches!(e, PoolEvent::PoolExhausted { .. })),
            0
        );
    }

    #[test]
    fn test_invalidate_on_access_gives_up_after_max_fresh_failures() {
        let check = |_: &u32| HealthVerdict::unhealthy("never ready");
        let sink = Arc::new(RecordingSink::default());
        let core = core_with(on_access_config(), Some(Box::new(check)), sink.clone());

        let err = core.acquire().unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { in_use: 0, max: 3 }));
        assert_eq!(core.metrics.total_created.load(Ordering::Relaxed), 3);
        assert_eq!(core.status().live(), 0);
        assert_eq!(core.status().creating, 0);
    }

    #[test]
    fn test_invalidate_on_access_skips_unhealthy_idle() {
        let broken = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&broken);
        let check =
            move |value: &u32| HealthVerdict::from(!(*value == 0 && flag.load(Ordering::SeqCst)));
        let core = core_with(on_access_config(), Some(Box::new(check)), Arc::new(TracingSink));

        let first = core.acquire().unwrap();
        let second = core.acquire().unwrap();
        assert_eq!((*first, *second), (0, 1));
        drop(first);
        drop(second);
        assert_eq!(core.status().idle, 2);

        // resource 0 went bad while idle
        broken.store(true, Ordering::SeqCst);
        let handle = core.acquire().unwrap();
        assert_eq!(*handle, 1);
        assert_eq!(core.status().live(), 1);
    }

    #[test]
    fn test_validate_on_release_drops_unhealthy() {
        let config = PoolConfiguration::new()
            .with_counts(0, 0, 2)
            .without_count_keeper()
            .with_validate_on_release(true);
        let check = |value: &u32| HealthVerdict::from(*value % 2 == 1);
        let core = core_with(config, Some(Box::new(check)), Arc::new(TracingSink));

        drop(core.acquire().unwrap());
        assert_eq!(core.status().live(), 0);

        drop(core.acquire().unwrap());
        assert_eq!(core.status().idle, 1);
    }

    #[test]
    fn test_set_desired_count_clamps() {
        let config = PoolConfiguration::new().with_counts(2, 2, 4).without_count_keeper();
        let core = core_with(config, None, Arc::new(TracingSink));

        assert_eq!(core.set_desired_count(10), 4);
        assert_eq!(core.set_desired_count(0), 2);
        assert_eq!(core.desired_count(), 2);
    }

    #[test]
    fn test_creation_finishing_after_close_leaves_no_slot() {
        let sink = Arc::new(RecordingSink::default());
        let config = PoolConfiguration::new().with_counts(0, 0, 2).without_count_keeper();
        let core = core_with(config, None, sink.clone());

        assert_eq!(core.lock().reserve(1, 2), 1);
        core.close();
        core.drain();

        let reservation = Reservation::adopt(&core);
        let created = core
            .create_resource(reservation, SlotState::Idle, CreationOrigin::CountKeeper)
            .unwrap();
        assert!(created.is_none());

        let status = core.status();
        assert_eq!(status.live(), 0);
        assert_eq!(status.creating, 0);
        assert_eq!(
            sink.count(|e| matches!(e, PoolEvent::ResourceCreated { .. })),
            0
        );
    }

    #[test]
    fn test_release_after_drain_is_harmless() {
        let core = simple_core(1);
        let handle = core.acquire().unwrap();
        core.close();
        core.drain();

        drop(handle);
        assert_eq!(core.status().live(), 0);
        assert!(matches!(core.acquire(), Err(PoolError::Closed)));
    }
}
