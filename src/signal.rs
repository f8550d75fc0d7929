//! Interruptible periodic wait and thread handles for background jobs

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::errors::{PoolError, PoolResult};

/// Why a background job woke up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// The interval elapsed
    Elapsed,
    /// Another component asked for an early cycle
    Nudged,
    /// Shutdown was requested
    Stopped,
}

#[derive(Default)]
struct SignalState {
    stop: bool,
    nudged: bool,
}

/// Stop flag plus wake-up channel shared between a job and its owner
#[derive(Default)]
pub(crate) struct JobSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl JobSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `interval` in steps of at most `increment`, rechecking the
    /// stop flag between steps.
    pub fn wait(&self, interval: Duration, increment: Duration) -> Wake {
        let deadline = Instant::now() + interval;
        let mut state = self.state.lock();
        loop {
            if state.stop {
                return Wake::Stopped;
            }
            if state.nudged {
                state.nudged = false;
                return Wake::Nudged;
            }
            let now = Instant::now();
            if now >= deadline {
                return Wake::Elapsed;
            }
            let step = (deadline - now).min(increment);
            self.cond.wait_for(&mut state, step);
        }
    }

    pub fn nudge(&self) {
        self.state.lock().nudged = true;
        self.cond.notify_all();
    }

    pub fn stop(&self) {
        self.state.lock().stop = true;
        self.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stop
    }
}

/// A running background job
pub(crate) struct JobHandle {
    name: &'static str,
    thread: Option<JoinHandle<()>>,
}

impl JobHandle {
    pub fn spawn<F>(name: &'static str, pool: &str, body: F) -> PoolResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let thread = thread::Builder::new()
            .name(format!("{pool}-{name}"))
            .spawn(body)
            .map_err(|source| PoolError::WorkerSpawn { job: name, source })?;

        Ok(Self {
            name,
            thread: Some(thread),
        })
    }

    /// Wait for the job thread to exit. The job must already have been
    /// signalled to stop.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!(job = self.name, "background job panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_wait_elapses() {
        let signal = JobSignal::new();
        let started = Instant::now();

        let wake = signal.wait(Duration::from_millis(30), Duration::from_millis(10));
        assert_eq!(wake, Wake::Elapsed);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_stop_interrupts_long_wait() {
        let signal = Arc::new(JobSignal::new());
        let waiter = Arc::clone(&signal);
        let started = Instant::now();

        let thread = thread::spawn(move || {
            waiter.wait(Duration::from_secs(60), Duration::from_millis(50))
        });
        thread::sleep(Duration::from_millis(20));
        signal.stop();

        assert_eq!(thread.join().unwrap(), Wake::Stopped);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(signal.is_stopped());
    }

    #[test]
    fn test_nudge_is_consumed_once() {
        let signal = JobSignal::new();
        signal.nudge();

        assert_eq!(
            signal.wait(Duration::from_secs(60), Duration::from_millis(10)),
            Wake::Nudged
        );
        assert_eq!(
            signal.wait(Duration::from_millis(10), Duration::from_millis(10)),
            Wake::Elapsed
        );
    }

    #[test]
    fn test_stop_wins_over_nudge() {
        let signal = JobSignal::new();
        signal.nudge();
        signal.stop();

        assert_eq!(signal.wait(Duration::from_secs(1), Duration::from_millis(10)), Wake::Stopped);
    }

    #[test]
    fn test_job_handle_runs_and_joins() {
        let signal = Arc::new(JobSignal::new());
        let job_signal = Arc::clone(&signal);
        let mut handle = JobHandle::spawn("test-job", "pool", move || {
            let (interval, increment) = (Duration::from_secs(1), Duration::from_millis(5));
            while job_signal.wait(interval, increment) != Wake::Stopped {}
        })
        .unwrap();

        signal.stop();
        handle.join();
        handle.join();
    }
}
