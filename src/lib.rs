//! # Esox.Respool
//!
//! Thread-safe pool of shared resources (database connections, sessions,
//! buffers) with background health care and resource count keeping.
//!
//! ## Features
//!
//! - Resources created on demand by a user factory, up to a hard maximum
//! - Fail-fast acquisition: no waiting queue, exhaustion is reported at once
//! - Shared, cloneable handles that return the resource when the last clone
//!   is dropped
//! - Count keeper thread converging the pool toward a desired count
//! - Health-care thread checking idle resources and replacing failures
//! - Synchronous, channel-based and async (tokio) health checks
//! - Optional checks on access and on release
//! - Time-to-live and idle-timeout eviction
//! - Management hooks for custom scaling policies
//! - Structured events through `tracing`, metrics and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_respool::{Pool, PoolConfiguration, ResourceCreationError};
//!
//! let pool = Pool::builder(|| Ok::<_, ResourceCreationError>(String::from("connection")))
//!     .config(PoolConfiguration::new().with_counts(0, 0, 4).without_count_keeper())
//!     .build()
//!     .unwrap();
//! {
//!     let conn = pool.acquire().unwrap();
//!     println!("Got: {}", *conn);
//!     // Resource automatically returned when `conn` goes out of scope
//! }
//! assert_eq!(pool.status().idle, 1);
//! ```

mod config;
mod count_keeper;
mod errors;
mod events;
mod eviction;
mod health;
mod health_care;
mod hook;
mod metrics;
mod pool;
mod pool_core;
mod signal;
mod slot;
mod status;

pub use config::PoolConfiguration;
pub use errors::{HealthCheckError, PoolError, PoolResult, ResourceCreationError};
pub use events::{CreationOrigin, DestroyReason, EventSink, PoolEvent, TracingSink};
pub use eviction::EvictionPolicy;
pub use health::{AsyncHealthCheck, HealthCheck, HealthProbe, HealthVerdict, RuntimeHealthCheck};
pub use hook::{LoadScalingHook, NoopHook, PoolControl, PoolManagementHook};
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use pool::{Pool, PoolBuilder};
pub use pool_core::{PooledResource, ResourceFactory};
pub use slot::{SlotId, SlotState};
pub use status::PoolStatus;
