//! End-to-end pool scenarios with the background jobs running.

use esox_respool::{
    DestroyReason, EventSink, HealthVerdict, Pool, PoolConfiguration, PoolError, PoolEvent,
    ResourceCreationError,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Connection {
    id: usize,
}

/// Remembers the ids of dropped connections
struct Tracked {
    id: usize,
    dropped: Arc<Mutex<Vec<usize>>>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.dropped.lock().push(self.id);
    }
}

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<PoolEvent>>>,
}

impl Recorder {
    fn count(&self, predicate: impl Fn(&PoolEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

impl EventSink for Recorder {
    fn record(&self, _pool: &str, event: &PoolEvent) {
        self.events.lock().push(event.clone());
    }
}

fn counting_factory(
    created: Arc<AtomicUsize>,
) -> impl Fn() -> Result<Connection, ResourceCreationError> + Send + Sync + 'static {
    move || {
        let id = created.fetch_add(1, Ordering::SeqCst);
        Ok(Connection { id })
    }
}

fn wait_until(deadline: Duration, condition: impl Fn() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn exhaustion_at_max_with_keeper_running() {
    let config = PoolConfiguration::new()
        .with_counts(2, 2, 5)
        .with_count_keeper_interval(Duration::from_millis(50))
        .with_wait_increment(Duration::from_millis(10));
    let pool = Pool::builder(counting_factory(Arc::new(AtomicUsize::new(0))))
        .config(config)
        .build()
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || pool.status().idle == 2));

    let held: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
    let result = pool.acquire();
    assert!(matches!(result, Err(PoolError::Exhausted { in_use: 5, max: 5 })));

    drop(held);
    assert!(pool.acquire().is_ok());
}

#[test]
fn one_unhealthy_of_three_is_replaced() {
    let broken = Arc::new(Mutex::new(HashSet::new()));
    let dropped = Arc::new(Mutex::new(Vec::new()));
    let created = Arc::new(AtomicUsize::new(0));
    let recorder = Recorder::default();
    let config = PoolConfiguration::new()
        .with_counts(0, 3, 5)
        .with_count_keeper_interval(Duration::from_millis(40))
        .with_health_check_interval(Duration::from_millis(40))
        .with_wait_increment(Duration::from_millis(10));

    let (factory_created, factory_dropped) = (Arc::clone(&created), Arc::clone(&dropped));
    let check_broken = Arc::clone(&broken);
    let pool = Pool::builder(move || {
        Ok::<_, ResourceCreationError>(Tracked {
            id: factory_created.fetch_add(1, Ordering::SeqCst),
            dropped: Arc::clone(&factory_dropped),
        })
    })
    .config(config)
    .health_check(move |conn: &Tracked| {
        HealthVerdict::from(!check_broken.lock().contains(&conn.id))
    })
    .event_sink(recorder.clone())
    .build()
    .unwrap();

    // the keeper creates ids 0, 1 and 2
    assert!(wait_until(Duration::from_secs(2), || pool.status().idle == 3));
    broken.lock().insert(1);

    assert!(wait_until(Duration::from_secs(3), || {
        created.load(Ordering::SeqCst) == 4 && pool.status().idle == 3
    }));

    assert_eq!(*dropped.lock(), vec![1]);
    assert_eq!(
        recorder.count(|e| matches!(
            e,
            PoolEvent::ResourceDestroyed {
                reason: DestroyReason::Unhealthy,
                ..
            }
        )),
        1
    );
    assert_eq!(
        recorder.count(|e| matches!(e, PoolEvent::ResourceDestroyed { .. })),
        1
    );
}

#[test]
fn keeper_converges_both_ways() {
    let config = PoolConfiguration::new()
        .with_counts(1, 4, 6)
        .with_count_keeper_interval(Duration::from_millis(50))
        .with_wait_increment(Duration::from_millis(10));
    let pool = Pool::builder(counting_factory(Arc::new(AtomicUsize::new(0))))
        .config(config)
        .build()
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || pool.status().idle == 4));

    assert_eq!(pool.set_desired_count(1), 1);
    assert!(wait_until(Duration::from_secs(2), || pool.status().live() == 1));
}

#[test]
fn in_use_resources_survive_failing_checks() {
    let config = PoolConfiguration::new()
        .with_counts(0, 0, 2)
        .without_count_keeper()
        .with_health_check_interval(Duration::from_millis(20))
        .with_wait_increment(Duration::from_millis(5));
    let pool = Pool::builder(counting_factory(Arc::new(AtomicUsize::new(0))))
        .config(config)
        .health_check(|_: &Connection| HealthVerdict::unhealthy("always broken"))
        .build()
        .unwrap();

    let held = pool.acquire().unwrap();
    thread::sleep(Duration::from_millis(150));

    assert_eq!(pool.status().in_use, 1);
    assert_eq!(held.id, 0);

    // once returned, the next cycle removes it
    drop(held);
    assert!(wait_until(Duration::from_secs(2), || pool.status().live() == 0));
}

#[test]
fn nothing_runs_after_shutdown() {
    let created = Arc::new(AtomicUsize::new(0));
    let checks = Arc::new(AtomicUsize::new(0));
    let config = PoolConfiguration::new()
        .with_counts(0, 2, 4)
        .with_count_keeper_interval(Duration::from_millis(10))
        .with_health_check_interval(Duration::from_millis(10))
        .with_wait_increment(Duration::from_millis(5));

    let check_calls = Arc::clone(&checks);
    let pool = Pool::builder(counting_factory(Arc::clone(&created)))
        .config(config)
        .health_check(move |_: &Connection| {
            check_calls.fetch_add(1, Ordering::SeqCst);
            HealthVerdict::Healthy
        })
        .build()
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || checks.load(Ordering::SeqCst) > 0));

    let started = Instant::now();
    pool.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2));

    let created_at_shutdown = created.load(Ordering::SeqCst);
    let checks_at_shutdown = checks.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(created.load(Ordering::SeqCst), created_at_shutdown);
    assert_eq!(checks.load(Ordering::SeqCst), checks_at_shutdown);
}

#[test]
fn stale_idle_resource_is_never_handed_out() {
    let broken = Arc::new(Mutex::new(HashSet::new()));
    let config = PoolConfiguration::new()
        .with_counts(0, 0, 3)
        .without_count_keeper()
        .with_health_check_interval(Duration::from_secs(3600))
        .with_invalidate_on_access(true);

    let check_broken = Arc::clone(&broken);
    let pool = Pool::builder(counting_factory(Arc::new(AtomicUsize::new(0))))
        .config(config)
        .health_check(move |conn: &Connection| {
            HealthVerdict::from(!check_broken.lock().contains(&conn.id))
        })
        .build()
        .unwrap();

    drop(pool.acquire().unwrap());
    broken.lock().insert(0);

    let conn = pool.acquire().unwrap();
    assert_eq!(conn.id, 1);
    assert_eq!(pool.metrics().health_check_failures, 1);
}
