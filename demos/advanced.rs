//! Advanced features: background jobs, eviction, hooks, events and Prometheus export

use esox_respool::{
    EventSink, HealthCheck, HealthProbe, HealthVerdict, LoadScalingHook, Pool, PoolConfiguration,
    PoolEvent, ResourceCreationError,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Debug)]
struct Connection {
    id: usize,
    broken: AtomicBool,
}

fn connection_factory() -> impl Fn() -> Result<Connection, ResourceCreationError> + Send + Sync {
    let next = AtomicUsize::new(1);
    move || {
        Ok(Connection {
            id: next.fetch_add(1, Ordering::Relaxed),
            broken: AtomicBool::new(false),
        })
    }
}

/// Checks connections on a worker thread and reports back over a channel
struct WorkerCheck;

impl HealthCheck<Connection> for WorkerCheck {
    fn check(&self, connection: &Arc<Connection>) -> HealthProbe {
        let (sender, receiver) = crossbeam::channel::bounded(1);
        let connection = Arc::clone(connection);
        thread::spawn(move || {
            let healthy = !connection.broken.load(Ordering::Relaxed);
            let _ = sender.send(Ok(HealthVerdict::from(healthy)));
        });
        HealthProbe::Pending(receiver)
    }
}

/// Prints every event
struct PrintSink;

impl EventSink for PrintSink {
    fn record(&self, pool: &str, event: &PoolEvent) {
        println!("   [{}] {:?}", pool, event);
    }
}

fn main() {
    println!("=== Esox.Respool - Advanced Features ===\n");

    // Example 1: Count keeper and health-care job
    background_jobs();

    // Example 2: Eviction / TTL
    eviction_ttl();

    // Example 3: Load-based scaling hook
    scaling_hook();

    // Example 4: Prometheus metrics
    prometheus_export();
}

fn background_jobs() {
    println!("1. Count Keeper and Health-care Job:");

    let config = PoolConfiguration::new()
        .with_counts(2, 3, 6)
        .with_count_keeper_interval(Duration::from_millis(100))
        .with_health_check_interval(Duration::from_millis(150))
        .with_wait_increment(Duration::from_millis(20));

    let pool = Pool::builder(connection_factory())
        .name("jobs")
        .config(config)
        .health_check(WorkerCheck)
        .event_sink(PrintSink)
        .build()
        .unwrap();

    thread::sleep(Duration::from_millis(200));
    println!("   Idle after warm-up: {}", pool.status().idle);

    {
        let conn = pool.acquire().unwrap();
        println!("   Breaking connection {}", conn.id);
        conn.broken.store(true, Ordering::Relaxed);
    }

    thread::sleep(Duration::from_millis(400));
    println!("   Idle after health care: {}", pool.status().idle);

    pool.shutdown();
    println!();
}

fn eviction_ttl() {
    println!("2. Eviction / TTL:");

    let config = PoolConfiguration::new()
        .with_counts(0, 0, 3)
        .without_count_keeper()
        .with_health_check_interval(Duration::from_millis(100))
        .with_wait_increment(Duration::from_millis(20))
        .with_ttl(Duration::from_secs(2))
        .with_idle_timeout(Duration::from_millis(200));

    let pool = Pool::builder(connection_factory())
        .config(config)
        .health_check(|conn: &Connection| HealthVerdict::from(!conn.broken.load(Ordering::Relaxed)))
        .build()
        .unwrap();

    {
        let conn = pool.acquire().unwrap();
        println!("   Got: {}", conn.id);
    }
    println!("   Idle after quick return: {}", pool.status().idle);

    println!("   Waiting for idle timeout...");
    thread::sleep(Duration::from_millis(500));

    println!("   Idle after timeout: {}", pool.status().idle);
    println!("   Evictions: {}", pool.metrics().evictions);
    println!();
}

fn scaling_hook() {
    println!("3. Load Scaling Hook:");

    let config = PoolConfiguration::new()
        .with_counts(1, 1, 8)
        .with_count_keeper_interval(Duration::from_millis(50))
        .with_wait_increment(Duration::from_millis(10));

    let pool = Pool::builder(connection_factory())
        .config(config)
        .hook(LoadScalingHook::new(0.75, 0.25).with_step(2))
        .build()
        .unwrap();

    thread::sleep(Duration::from_millis(100));
    let held: Vec<_> = (0..3).filter_map(|_| pool.try_acquire()).collect();
    println!("   Holding {} connections", held.len());

    thread::sleep(Duration::from_millis(200));
    println!("   Desired count under load: {}", pool.desired_count());

    drop(held);
    thread::sleep(Duration::from_millis(300));
    println!("   Desired count after release: {}", pool.desired_count());
    println!();
}

fn prometheus_export() {
    println!("4. Prometheus Metrics Export:");

    let pool = Pool::builder(connection_factory())
        .name("example_pool")
        .config(PoolConfiguration::new().with_counts(0, 0, 5).without_count_keeper())
        .build()
        .unwrap();

    {
        let _conn1 = pool.acquire().unwrap();
        let _conn2 = pool.acquire().unwrap();

        let mut tags = HashMap::new();
        tags.insert("service".to_string(), "example".to_string());
        tags.insert("env".to_string(), "dev".to_string());

        match pool.export_metrics_prometheus(Some(&tags)) {
            Ok(text) => println!("{}", text),
            Err(e) => println!("   Export failed: {}", e),
        }
    }
}
