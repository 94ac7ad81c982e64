//! Connection pooling example.
//!
//! Drives a small burst of concurrent requests through a pool with a low
//! per-node cap and prints the pool status along the way.
//!
//! # Running
//!
//! ```bash
//! # Comma-separated memcached-style servers
//! export NODEPOOL_ADDRS=127.0.0.1:11211
//!
//! cargo run --example connection_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use nodepool::{Context, Pool, PoolError, TcpDialer};
use tokio::time::Instant;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let addrs: Vec<String> = std::env::var("NODEPOOL_ADDRS")
        .unwrap_or_else(|_| "127.0.0.1:11211".into())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    println!("=== Connection Pool Example ===\n");

    let pool = Pool::builder()
        .addresses(addrs.clone())
        .max_connections_per_node(2)
        .dialer(TcpDialer::new().connect_timeout(Duration::from_secs(5)))
        .build()?;

    println!("Pool configuration:");
    println!("  Addresses: {:?}", pool.addresses());
    println!(
        "  Max connections per node: {}",
        pool.config().max_connections_per_node
    );
    println!();

    // Example 1: Basic usage
    println!("1. Basic pool usage:");
    {
        let ctx = Context::with_timeout(Duration::from_secs(5));
        let mut conn = pool.get(&ctx, &addrs[0]).await?;
        conn.write_all(b"version\r\n").await?;
        conn.flush().await?;
        let mut line = String::new();
        conn.read_line(&mut line).await?;
        println!("  {} answered: {}", conn.addr(), line.trim_end());
        conn.release()?;
    }
    print_pool_status(&pool, &addrs);

    // Example 2: More tasks than slots
    println!("\n2. Concurrent usage (8 tasks, 2 slots per node):");
    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..8 {
        let pool = pool.clone();
        let addr = addrs[i % addrs.len()].clone();
        handles.push(tokio::spawn(async move {
            let ctx = Context::with_timeout(Duration::from_secs(10));
            let mut conn = pool.get(&ctx, &addr).await?;
            conn.write_all(b"version\r\n").await?;
            conn.flush().await?;
            let mut line = String::new();
            conn.read_line(&mut line).await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            conn.release()?;
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(i)
        }));
    }
    for handle in handles {
        match handle.await? {
            Ok(i) => println!("  task {i} done"),
            Err(e) => println!("  task failed: {e}"),
        }
    }
    println!("  elapsed: {:?}", start.elapsed());
    print_pool_status(&pool, &addrs);

    // Example 3: Waiting with a short deadline
    println!("\n3. Acquire timeout:");
    let held: Vec<_> = {
        let ctx = Context::with_timeout(Duration::from_secs(5));
        let mut held = Vec::new();
        for _ in 0..pool.config().max_connections_per_node {
            held.push(pool.get(&ctx, &addrs[0]).await?);
        }
        held
    };
    let ctx = Context::with_timeout(Duration::from_millis(100));
    match pool.get(&ctx, &addrs[0]).await {
        Err(PoolError::Context(e)) => println!("  gave up as expected: {e}"),
        Ok(_) => println!("  unexpectedly got a connection"),
        Err(e) => println!("  error: {e}"),
    }
    drop(held);

    pool.close().await;
    println!("\nPool closed.");
    Ok(())
}

fn print_pool_status(pool: &Pool, addrs: &[String]) {
    for addr in addrs {
        if let Some(status) = pool.status(addr) {
            println!(
                "  [{addr}] available={} in_use={} total={}/{}",
                status.available, status.in_use, status.total, status.max
            );
        }
    }
}
