//! Health checking contract for pooled resources

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};

use crate::errors::HealthCheckError;

/// Outcome of a health check that managed to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    Unhealthy { reason: String },
}

impl HealthVerdict {
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self::Unhealthy {
            reason: reason.into(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl From<bool> for HealthVerdict {
    fn from(healthy: bool) -> Self {
        if healthy {
            Self::Healthy
        } else {
            Self::unhealthy("health check returned false")
        }
    }
}

/// Result of starting a health check: either already known, or pending on
/// some worker that will report back.
#[derive(Debug)]
pub enum HealthProbe {
    Ready(Result<HealthVerdict, HealthCheckError>),
    Pending(Receiver<Result<HealthVerdict, HealthCheckError>>),
}

impl HealthProbe {
    pub fn ready(verdict: HealthVerdict) -> Self {
        Self::Ready(Ok(verdict))
    }

    pub fn failed(error: HealthCheckError) -> Self {
        Self::Ready(Err(error))
    }

    /// Wait for the verdict.
    ///
    /// A pending check that does not answer within `timeout` yields
    /// [`HealthCheckError::TimedOut`]; a worker that drops its sender without
    /// answering yields [`HealthCheckError::Abandoned`].
    pub fn wait(self, timeout: Duration) -> Result<HealthVerdict, HealthCheckError> {
        match self {
            Self::Ready(result) => result,
            Self::Pending(receiver) => match receiver.recv_timeout(timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => Err(HealthCheckError::TimedOut(timeout)),
                Err(RecvTimeoutError::Disconnected) => Err(HealthCheckError::Abandoned),
            },
        }
    }
}

/// Verifies that a resource is still usable.
///
/// Closures taking `&R` and returning a [`HealthVerdict`] implement this
/// trait directly. Checks that can fail to run, or that dispatch work
/// elsewhere, implement it by hand and return a [`HealthProbe`].
///
/// The pool never holds its lock while a check runs.
pub trait HealthCheck<R>: Send + Sync {
    fn check(&self, resource: &Arc<R>) -> HealthProbe;
}

impl<R, F> HealthCheck<R> for F
where
    F: Fn(&R) -> HealthVerdict + Send + Sync,
{
    fn check(&self, resource: &Arc<R>) -> HealthProbe {
        HealthProbe::ready(self(resource.as_ref()))
    }
}

/// Asynchronous health check, e.g. a ping over the resource's own connection
#[async_trait]
pub trait AsyncHealthCheck<R>: Send + Sync + 'static
where
    R: Send + Sync + 'static,
{
    async fn check(&self, resource: Arc<R>) -> Result<HealthVerdict, HealthCheckError>;
}

/// Runs an [`AsyncHealthCheck`] on a tokio runtime and hands the pool a
/// pending probe it can await with a timeout.
pub struct RuntimeHealthCheck<C> {
    check: Arc<C>,
    runtime: tokio::runtime::Handle,
}

impl<C> RuntimeHealthCheck<C> {
    pub fn new(check: C, runtime: tokio::runtime::Handle) -> Self {
        Self {
            check: Arc::new(check),
            runtime,
        }
    }
}

impl<R, C> HealthCheck<R> for RuntimeHealthCheck<C>
where
    R: Send + Sync + 'static,
    C: AsyncHealthCheck<R>,
{
    fn check(&self, resource: &Arc<R>) -> HealthProbe {
        let (sender, receiver) = channel::bounded(1);
        let check = Arc::clone(&self.check);
        let resource = Arc::clone(resource);

        self.runtime.spawn(async move {
            let result = check.check(resource).await;
            // the pool may have given up waiting
            let _ = sender.send(result);
        });

        HealthProbe::Pending(receiver)
    }
}
