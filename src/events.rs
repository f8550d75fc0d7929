//! Lifecycle and failure events emitted by the pool

use std::fmt;

use crate::slot::SlotId;

/// Which part of the pool asked the factory for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationOrigin {
    Acquire,
    CountKeeper,
    HealthCareJob,
}

/// Why a resource left the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// The count keeper removed it as surplus
    Surplus,
    /// A health check returned an unhealthy verdict
    Unhealthy,
    /// The caller invalidated it through its handle
    Invalidated,
    /// The eviction policy expired it
    Expired,
    /// The pool was shut down
    Shutdown,
}

impl fmt::Display for DestroyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Surplus => "surplus",
            Self::Unhealthy => "unhealthy",
            Self::Invalidated => "invalidated",
            Self::Expired => "expired",
            Self::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

/// A structured pool event
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    ResourceCreated {
        slot: SlotId,
        origin: CreationOrigin,
    },
    ResourceDestroyed {
        slot: SlotId,
        reason: DestroyReason,
    },
    ResourceCreationFailed {
        origin: CreationOrigin,
        error: String,
    },
    HealthCheckFailed {
        slot: SlotId,
        reason: String,
    },
    CountKeeperFailure {
        error: String,
    },
    HealthCareJobFailure {
        error: String,
    },
    PoolExhausted {
        in_use: usize,
        max: usize,
    },
}

/// Receives pool events.
///
/// Sinks are called without the pool lock held, possibly from the
/// background job threads.
pub trait EventSink: Send + Sync {
    fn record(&self, pool: &str, event: &PoolEvent);
}

/// Default sink: forwards every event to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, pool: &str, event: &PoolEvent) {
        match event {
            PoolEvent::ResourceCreated { slot, origin } => {
                tracing::debug!(pool, slot, ?origin, "resource created");
            }
            PoolEvent::ResourceDestroyed { slot, reason } => {
                tracing::debug!(pool, slot, %reason, "resource destroyed");
            }
            PoolEvent::ResourceCreationFailed { origin, error } => {
                tracing::warn!(pool, ?origin, error = %error, "resource creation failed");
            }
            PoolEvent::HealthCheckFailed { slot, reason } => {
                tracing::warn!(pool, slot, reason = %reason, "health check failed");
            }
            PoolEvent::CountKeeperFailure { error } => {
                tracing::error!(pool, error = %error, "count keeper cycle failed");
            }
            PoolEvent::HealthCareJobFailure { error } => {
                tracing::error!(pool, error = %error, "health-care job cycle failed");
            }
            PoolEvent::PoolExhausted { in_use, max } => {
                tracing::warn!(pool, in_use, max, "pool exhausted");
            }
        }
    }
}
