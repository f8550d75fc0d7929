//! Concurrency integration tests: capacity bound and exclusive hand-out
//! under contention from many threads.

use esox_respool::{HealthVerdict, Pool, PoolConfiguration, PoolError, ResourceCreationError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

const MAX: usize = 4;
const THREADS: usize = 16;
const ROUNDS: usize = 200;

#[derive(Default)]
struct Resource {
    held: AtomicBool,
}

#[derive(Default)]
struct Observed {
    current: AtomicUsize,
    peak: AtomicUsize,
    exhausted: AtomicUsize,
}

fn hammer(pool: Arc<Pool<Resource>>, observed: Arc<Observed>) {
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let observed = Arc::clone(&observed);
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    match pool.acquire() {
                        Ok(handle) => {
                            // nobody else may hold this resource
                            assert!(!handle.held.swap(true, Ordering::SeqCst));
                            let now = observed.current.fetch_add(1, Ordering::SeqCst) + 1;
                            observed.peak.fetch_max(now, Ordering::SeqCst);
                            assert!(pool.status().live() <= MAX);

                            thread::yield_now();

                            observed.current.fetch_sub(1, Ordering::SeqCst);
                            handle.held.store(false, Ordering::SeqCst);
                        }
                        Err(PoolError::Exhausted { max, .. }) => {
                            assert_eq!(max, MAX);
                            observed.exhausted.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn capacity_is_never_exceeded() {
    let created = Arc::new(AtomicUsize::new(0));
    let factory_created = Arc::clone(&created);
    let pool = Pool::builder(move || {
        factory_created.fetch_add(1, Ordering::SeqCst);
        Ok::<_, ResourceCreationError>(Resource::default())
    })
    .config(PoolConfiguration::new().with_counts(0, 0, MAX).without_count_keeper())
    .build()
    .unwrap();
    let pool = Arc::new(pool);
    let observed = Arc::new(Observed::default());

    hammer(Arc::clone(&pool), Arc::clone(&observed));

    assert!(observed.peak.load(Ordering::SeqCst) <= MAX);
    assert!(created.load(Ordering::SeqCst) <= MAX);

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert!(status.live() <= MAX);
}

#[test]
fn background_jobs_keep_bounds_under_contention() {
    let config = PoolConfiguration::new()
        .with_counts(1, 2, MAX)
        .with_count_keeper_interval(Duration::from_millis(5))
        .with_health_check_interval(Duration::from_millis(5))
        .with_wait_increment(Duration::from_millis(1))
        .with_validate_on_release(true);

    let pool = Pool::builder(|| Ok::<_, ResourceCreationError>(Resource::default()))
        .config(config)
        .health_check(|resource: &Resource| {
            HealthVerdict::from(!resource.held.load(Ordering::SeqCst))
        })
        .build()
        .unwrap();
    let pool = Arc::new(pool);
    let observed = Arc::new(Observed::default());

    hammer(Arc::clone(&pool), Arc::clone(&observed));

    assert!(observed.peak.load(Ordering::SeqCst) <= MAX);
    assert_eq!(pool.status().in_use, 0);

    let metrics = pool.metrics();
    assert_eq!(metrics.total_acquired, metrics.total_released);
}

#[test]
fn pool_and_handles_move_between_threads() {
    let pool = Pool::builder(|| Ok::<_, ResourceCreationError>(String::from("shared")))
        .config(PoolConfiguration::new().with_counts(0, 0, 1).without_count_keeper())
        .build()
        .unwrap();

    let handle = pool.acquire().unwrap();
    let clone = handle.clone();
    let reader = thread::spawn(move || clone.len());
    assert_eq!(reader.join().unwrap(), 6);
    drop(handle);

    let worker = thread::spawn(move || {
        let handle = pool.acquire().unwrap();
        handle.to_uppercase()
    });
    assert_eq!(worker.join().unwrap(), "SHARED");
}
