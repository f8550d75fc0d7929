// Esox.Respool
// Thread-safe shared-resource pool with background health care
// Version 1.0.0

// This is just a binary wrapper - the actual library is in lib.rs
// Run examples with: cargo run --example basic

use esox_respool::{Pool, PoolConfiguration, ResourceCreationError};

fn main() {
    println!("=== Esox.Respool v1.0.0 ===");
    println!("See demos/ directory for usage examples");
    println!("Run: cargo run --example basic");
    println!();

    // Quick demo
    println!("Quick Demo:");
    let pool = match Pool::builder(|| Ok::<_, ResourceCreationError>(String::from("connection")))
        .config(PoolConfiguration::new().with_counts(0, 0, 3).without_count_keeper())
        .build()
    {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("  Failed to build pool: {e}");
            return;
        }
    };

    match pool.acquire() {
        Ok(conn) => println!("  Got resource: {}", *conn),
        Err(e) => println!("  Acquire failed: {e}"),
    }

    println!("  Idle after return: {}", pool.status().idle);
}
