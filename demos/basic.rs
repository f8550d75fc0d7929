//! Basic usage examples for Pool

use esox_respool::{Pool, PoolConfiguration, ResourceCreationError};
use std::sync::atomic::{AtomicU32, Ordering};

fn main() {
    println!("=== Esox.Respool - Basic Examples ===\n");

    // Example 1: On-demand pool
    on_demand_pool();

    // Example 2: Fail-fast exhaustion
    exhaustion();

    // Example 3: Shared handles
    shared_handles();

    // Example 4: Status and metrics
    status_and_metrics();
}

fn numbered_factory() -> impl Fn() -> Result<u32, ResourceCreationError> + Send + Sync {
    let next = AtomicU32::new(1);
    move || Ok(next.fetch_add(1, Ordering::Relaxed))
}

fn on_demand_pool() {
    println!("1. On-demand Pool:");
    let pool = Pool::builder(numbered_factory())
        .name("basic")
        .config(PoolConfiguration::new().with_counts(0, 0, 3).without_count_keeper())
        .build()
        .unwrap();

    {
        let conn = pool.acquire().unwrap();
        println!("   Got resource: {}", *conn);
        // Resource automatically returned when dropped
    }

    println!("   Idle after return: {}\n", pool.status().idle);
}

fn exhaustion() {
    println!("2. Fail-fast Exhaustion:");
    let pool = Pool::builder(numbered_factory())
        .config(PoolConfiguration::new().with_counts(0, 0, 1).without_count_keeper())
        .build()
        .unwrap();

    let first = pool.try_acquire();
    assert!(first.is_some());
    println!("   First try: Success");

    match pool.acquire() {
        Ok(_) => println!("   Second try: unexpected success"),
        Err(e) => println!("   Second try: {}", e),
    }

    drop(first);

    let third = pool.try_acquire();
    assert!(third.is_some());
    println!("   Third try: Success\n");
}

fn shared_handles() {
    println!("3. Shared Handles:");
    let pool = Pool::builder(numbered_factory())
        .config(PoolConfiguration::new().with_counts(0, 0, 2).without_count_keeper())
        .build()
        .unwrap();

    let handle = pool.acquire().unwrap();
    let shared = handle.clone();
    drop(handle);
    println!("   In use while a clone is alive: {}", pool.status().in_use);

    drop(shared);
    println!("   In use after last clone dropped: {}\n", pool.status().in_use);
}

fn status_and_metrics() {
    println!("4. Status and Metrics:");
    let pool = Pool::builder(numbered_factory())
        .config(PoolConfiguration::new().with_counts(0, 0, 5).without_count_keeper())
        .build()
        .unwrap();

    {
        let _conn1 = pool.acquire().unwrap();
        let _conn2 = pool.acquire().unwrap();

        let status = pool.status();
        println!("   Healthy: {}", status.is_healthy());
        println!("   Utilization: {:.1}%", status.utilization() * 100.0);
        println!("   In use: {}, Idle: {}", status.in_use, status.idle);
    }

    let metrics = pool.export_metrics();
    println!("\n   Metrics:");
    for (key, value) in metrics {
        println!("     {}: {}", key, value);
    }
}
