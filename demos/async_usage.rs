//! Async usage examples

use async_trait::async_trait;
use esox_respool::{
    AsyncHealthCheck, HealthCheckError, HealthVerdict, Pool, PoolConfiguration,
    ResourceCreationError,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug)]
struct Session {
    id: usize,
    alive: AtomicBool,
}

/// Pings the session over "the network"
struct Ping;

#[async_trait]
impl AsyncHealthCheck<Session> for Ping {
    async fn check(&self, session: Arc<Session>) -> Result<HealthVerdict, HealthCheckError> {
        sleep(Duration::from_millis(5)).await;
        Ok(HealthVerdict::from(session.alive.load(Ordering::Relaxed)))
    }
}

fn session_factory() -> impl Fn() -> Result<Session, ResourceCreationError> + Send + Sync {
    let next = AtomicUsize::new(1);
    move || {
        Ok(Session {
            id: next.fetch_add(1, Ordering::Relaxed),
            alive: AtomicBool::new(true),
        })
    }
}

#[tokio::main]
async fn main() {
    println!("=== Esox.Respool - Async Examples ===\n");

    // Example 1: Async acquire
    async_acquire().await;

    // Example 2: Async health check
    async_health_check().await;

    // Example 3: Concurrent access
    concurrent_access().await;
}

async fn async_acquire() {
    println!("1. Async Acquire:");
    let pool = Pool::builder(session_factory())
        .config(PoolConfiguration::new().with_counts(0, 0, 1).without_count_keeper())
        .build()
        .unwrap();

    {
        let session = pool.acquire_async().await.unwrap();
        println!("   Got session asynchronously: {}", session.id);

        match pool.acquire_async().await {
            Ok(_) => println!("   Unexpected second session"),
            Err(e) => println!("   Error: {}", e),
        }
    }

    println!();
}

async fn async_health_check() {
    println!("2. Async Health Check:");

    let config = PoolConfiguration::new()
        .with_counts(0, 0, 2)
        .without_count_keeper()
        .with_health_check_interval(Duration::from_secs(30))
        .with_health_check_timeout(Duration::from_millis(500))
        .with_invalidate_on_access(true);

    let pool = Pool::builder(session_factory())
        .config(config)
        .async_health_check(tokio::runtime::Handle::current(), Ping)
        .build()
        .unwrap();

    let first_id = {
        let session = pool.acquire_async().await.unwrap();
        session.alive.store(false, Ordering::Relaxed);
        session.id
    };
    println!("   Session {} went stale while idle", first_id);

    let session = pool.acquire_async().await.unwrap();
    println!("   Checked on access, got session {} instead", session.id);
    println!("   Health check failures: {}", pool.metrics().health_check_failures);

    println!();
}

async fn concurrent_access() {
    println!("3. Concurrent Access:");

    let pool = Arc::new(
        Pool::builder(session_factory())
            .config(PoolConfiguration::new().with_counts(0, 0, 5).without_count_keeper())
            .build()
            .unwrap(),
    );

    let mut handles = vec![];

    for i in 0..10 {
        let pool_clone = Arc::clone(&pool);
        let handle = tokio::spawn(async move {
            match pool_clone.acquire_async().await {
                Ok(session) => {
                    println!("   Task {} got session: {}", i, session.id);
                    sleep(Duration::from_millis(50)).await;
                }
                Err(e) => println!("   Task {} couldn't get session: {}", i, e),
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.unwrap();
    }

    println!("   Final idle: {}", pool.status().idle);
}
