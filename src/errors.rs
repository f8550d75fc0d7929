//! Error types for the resource pool

use std::any::Any;
use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to direct callers of the pool
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Pool exhausted - {in_use} of {max} resources in use and none could be supplied")]
    Exhausted { in_use: usize, max: usize },

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to start the {job} worker thread")]
    WorkerSpawn {
        job: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Pool has been shut down")]
    Closed,

    #[error("Operation was cancelled")]
    Cancelled,
}

pub type PoolResult<T> = Result<T, PoolError>;

/// Failure of a factory to produce a resource
#[derive(Error, Debug)]
#[error("Resource creation failed: {message}")]
pub struct ResourceCreationError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ResourceCreationError {
    /// Create an error from a plain message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap the error that made the factory fail
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Self {
        Self::new(format!("factory panicked: {}", panic_message(payload.as_ref())))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure of the health check mechanism itself.
///
/// This is distinct from an unhealthy verdict: the check could not produce
/// any verdict at all.
#[derive(Error, Debug)]
pub enum HealthCheckError {
    #[error("Health check failed to run: {message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    #[error("Health check worker went away before reporting a verdict")]
    Abandoned,

    #[error("Health check panicked: {0}")]
    Panicked(String),

    #[error("Health check exceeded its timeout of {0:?}")]
    TimedOut(Duration),
}

impl HealthCheckError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Self {
        Self::Panicked(panic_message(payload.as_ref()))
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
