//! Pool-internal bookkeeping for individual resources

use std::sync::Arc;
use std::time::Instant;

/// Identifier of a slot, unique for the lifetime of a pool
pub type SlotId = u64;

/// State of a pooled resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SlotState {
    /// Available for acquisition
    Idle,
    /// Held by a caller
    InUse,
    /// Claimed by the health-care job while its check runs
    PendingHealthCheck,
    /// Failed a check; about to be removed
    Invalid,
}

/// One pooled resource plus its metadata
pub(crate) struct ResourceSlot<R> {
    pub id: SlotId,
    pub resource: Arc<R>,
    pub state: SlotState,
    pub created_at: Instant,
    pub last_used: Instant,
    pub last_health_check: Option<Instant>,
}

/// The collection of slots guarded by the pool lock.
///
/// `creating` counts capacity reserved for factory calls running outside
/// the lock, so that `live()` never exceeds the configured maximum.
pub(crate) struct SlotTable<R> {
    slots: Vec<ResourceSlot<R>>,
    creating: usize,
    next_id: SlotId,
}

impl<R> SlotTable<R> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            creating: 0,
            next_id: 1,
        }
    }

    /// Resources that exist or are being created, excluding invalid ones
    pub fn live(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state != SlotState::Invalid)
            .count()
            + self.creating
    }

    pub fn count(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|slot| slot.state == state).count()
    }

    pub fn creating(&self) -> usize {
        self.creating
    }

    /// Reserve capacity for `wanted` creations, bounded by `max`.
    /// Returns how many were reserved.
    pub fn reserve(&mut self, wanted: usize, max: usize) -> usize {
        let granted = wanted.min(max.saturating_sub(self.live()));
        self.creating += granted;
        granted
    }

    pub fn unreserve(&mut self) {
        debug_assert!(self.creating > 0, "unreserve without reservation");
        self.creating = self.creating.saturating_sub(1);
    }

    /// Turn one reservation into a slot holding `resource`
    pub fn commit(&mut self, resource: Arc<R>, state: SlotState) -> SlotId {
        self.unreserve();
        self.insert(resource, state)
    }

    fn insert(&mut self, resource: Arc<R>, state: SlotState) -> SlotId {
        debug_assert!(
            !self.slots.iter().any(|slot| Arc::ptr_eq(&slot.resource, &resource)),
            "resource already tracked by another slot"
        );
        let id = self.next_id;
        self.next_id += 1;
        let now = Instant::now();
        self.slots.push(ResourceSlot {
            id,
            resource,
            state,
            created_at: now,
            last_used: now,
            last_health_check: None,
        });
        id
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut ResourceSlot<R>> {
        self.slots.iter_mut().find(|slot| slot.id == id)
    }

    /// Claim the first idle slot for a caller
    pub fn claim_idle(&mut self) -> Option<(SlotId, Arc<R>)> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.state == SlotState::Idle)?;
        slot.state = SlotState::InUse;
        Some((slot.id, Arc::clone(&slot.resource)))
    }

    /// Claim an idle slot for a health check, if it is still idle
    pub fn claim_for_check(&mut self, id: SlotId) -> Option<Arc<R>> {
        let slot = self.get_mut(id)?;
        if slot.state != SlotState::Idle {
            return None;
        }
        slot.state = SlotState::PendingHealthCheck;
        Some(Arc::clone(&slot.resource))
    }

    pub fn remove(&mut self, id: SlotId) -> Option<ResourceSlot<R>> {
        let index = self.slots.iter().position(|slot| slot.id == id)?;
        Some(self.slots.swap_remove(index))
    }

    /// Mark a slot invalid and take it out of the table
    pub fn invalidate(&mut self, id: SlotId) -> Option<ResourceSlot<R>> {
        if let Some(slot) = self.get_mut(id) {
            slot.state = SlotState::Invalid;
        }
        self.remove(id)
    }

    pub fn idle_ids(&self) -> Vec<SlotId> {
        self.slots
            .iter()
            .filter(|slot| slot.state == SlotState::Idle)
            .map(|slot| slot.id)
            .collect()
    }

    /// Remove idle slots matching `predicate`
    pub fn remove_idle_where<F>(&mut self, mut predicate: F) -> Vec<ResourceSlot<R>>
    where
        F: FnMut(&ResourceSlot<R>) -> bool,
    {
        let mut removed = Vec::new();
        let mut index = 0;
        while index < self.slots.len() {
            let slot = &self.slots[index];
            if slot.state == SlotState::Idle && predicate(slot) {
                removed.push(self.slots.swap_remove(index));
            } else {
                index += 1;
            }
        }
        removed
    }

    /// Remove up to `count` idle slots, least recently used first
    pub fn remove_idle_lru(&mut self, count: usize) -> Vec<ResourceSlot<R>> {
        let mut idle: Vec<(Instant, SlotId)> = self
            .slots
            .iter()
            .filter(|slot| slot.state == SlotState::Idle)
            .map(|slot| (slot.last_used, slot.id))
            .collect();
        idle.sort_unstable();
        idle.into_iter()
            .take(count)
            .filter_map(|(_, id)| self.remove(id))
            .collect()
    }

    pub fn drain(&mut self) -> Vec<ResourceSlot<R>> {
        std::mem::take(&mut self.slots)
    }
}
