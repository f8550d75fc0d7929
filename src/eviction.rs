//! Eviction policies for automatic removal of aged idle resources

use std::time::{Duration, Instant};

/// Eviction policy for idle resources.
///
/// The health-care job applies it to idle slots at the start of every cycle;
/// resources in use are never evicted.
///
/// # Examples
///
/// ```
/// use esox_respool::{EvictionPolicy, PoolConfiguration};
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_ttl(Duration::from_secs(3600));
///
/// assert!(matches!(config.eviction, EvictionPolicy::TimeToLive(_)));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// No eviction
    #[default]
    None,

    /// Time-to-live: resources expire a fixed duration after creation
    TimeToLive(Duration),

    /// Idle timeout: resources expire after sitting unused
    IdleTimeout(Duration),

    /// Combined: TTL or idle timeout, whichever hits first
    Combined {
        ttl: Duration,
        idle_timeout: Duration,
    },
}

impl EvictionPolicy {
    /// Add a time-to-live, keeping any idle timeout already set
    pub fn with_ttl(self, ttl: Duration) -> Self {
        match self {
            Self::IdleTimeout(idle_timeout) | Self::Combined { idle_timeout, .. } => {
                Self::Combined { ttl, idle_timeout }
            }
            Self::None | Self::TimeToLive(_) => Self::TimeToLive(ttl),
        }
    }

    /// Add an idle timeout, keeping any time-to-live already set
    pub fn with_idle_timeout(self, idle_timeout: Duration) -> Self {
        match self {
            Self::TimeToLive(ttl) | Self::Combined { ttl, .. } => {
                Self::Combined { ttl, idle_timeout }
            }
            Self::None | Self::IdleTimeout(_) => Self::IdleTimeout(idle_timeout),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether a resource created at `created_at` and last released at
    /// `last_used` has expired as of `now`
    pub fn is_expired(&self, created_at: Instant, last_used: Instant, now: Instant) -> bool {
        let age = now.saturating_duration_since(created_at);
        let idle = now.saturating_duration_since(last_used);
        match self {
            Self::None => false,
            Self::TimeToLive(ttl) => age > *ttl,
            Self::IdleTimeout(timeout) => idle > *timeout,
            Self::Combined { ttl, idle_timeout } => age > *ttl || idle > *idle_timeout,
        }
    }
}
