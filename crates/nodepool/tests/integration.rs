//! Connection pool integration tests.
//!
//! These run against local mock servers and in-memory pipes, so no external
//! service is needed:
//!
//! ```bash
//! cargo test -p nodepool --test integration
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use nodepool::{Context, ContextError, Pool, PoolError, TcpDialer};
use nodepool_testing::{DuplexDialer, MockResponse, MockServer, PoolEvent, RecordingObserver};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_test::{assert_pending, assert_ready};

const WAIT: Duration = Duration::from_secs(5);

async fn mock_server() -> MockServer {
    MockServer::builder()
        .with_response("version", MockResponse::line("VERSION 1.6.21"))
        .build()
        .await
        .expect("Failed to start mock server")
}

fn tcp_pool(addrs: &[String], max: u32) -> Pool {
    Pool::builder()
        .addresses(addrs.iter().cloned())
        .max_connections_per_node(max)
        .dialer(TcpDialer::new().connect_timeout(Duration::from_secs(2)))
        .build()
        .expect("Failed to create pool")
}

// =============================================================================
// Basic Pool Tests
// =============================================================================

#[tokio::test]
async fn test_pool_create_and_close() {
    let server = mock_server().await;
    let pool = tcp_pool(&[server.addr_string()], 5);

    assert!(!pool.is_closed());

    let status = pool.status(&server.addr_string()).unwrap();
    assert_eq!(status.max, 5);
    assert_eq!(status.in_use, 0);
    assert_eq!(server.accepted_count(), 0, "Pool should dial lazily");

    pool.close().await;
    assert!(pool.is_closed());
}

#[tokio::test]
async fn test_pool_get_connection() {
    let server = mock_server().await;
    let addr = server.addr_string();
    let pool = tcp_pool(&[addr.clone()], 5);

    let mut conn = pool
        .get(&Context::with_timeout(WAIT), &addr)
        .await
        .expect("Failed to get connection");

    assert_eq!(pool.status(&addr).unwrap().in_use, 1);

    conn.write_all(b"version\r\n").await.unwrap();
    conn.flush().await.unwrap();
    let mut line = String::new();
    conn.read_line(&mut line).await.unwrap();
    assert_eq!(line, "VERSION 1.6.21\r\n");

    conn.release().unwrap();

    let status = pool.status(&addr).unwrap();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 1);

    pool.close().await;
}

#[tokio::test]
async fn test_pool_connection_reuse() {
    let server = mock_server().await;
    let addr = server.addr_string();
    let pool = tcp_pool(&[addr.clone()], 2);
    let ctx = Context::with_timeout(WAIT);

    let conn1 = pool.get(&ctx, &addr).await.unwrap();
    let id1 = conn1.id();
    pool.release(conn1).unwrap();

    let conn2 = pool.get(&ctx, &addr).await.unwrap();
    assert_eq!(id1, conn2.id(), "Should reuse the same connection");
    assert_eq!(server.accepted_count(), 1);

    drop(conn2);
    pool.close().await;
}

#[tokio::test]
async fn test_pool_try_get_no_idle_connections() {
    let server = mock_server().await;
    let addr = server.addr_string();
    let pool = tcp_pool(&[addr.clone()], 1);

    let conn = pool.get(&Context::with_timeout(WAIT), &addr).await.unwrap();

    let result = pool.try_get(&addr).expect("try_get should not error");
    assert!(result.is_none(), "Should return None when no idle connections");

    drop(conn);
    assert!(pool.try_get(&addr).unwrap().is_some());
    pool.close().await;
}

#[tokio::test]
async fn test_pool_dial_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let pool = tcp_pool(&[addr.clone()], 1);
    let err = pool
        .get(&Context::with_timeout(WAIT), &addr)
        .await
        .unwrap_err();

    match err {
        PoolError::Dial { addr: failed, .. } => assert_eq!(failed, addr),
        other => panic!("expected dial error, got {other:?}"),
    }
    assert_eq!(pool.status(&addr).unwrap().total, 0);
}

#[tokio::test]
async fn test_pool_recovers_after_dial_failures() {
    let dialer = DuplexDialer::new();
    let observer = RecordingObserver::new();
    let pool = Pool::builder()
        .addresses(["a:1", "b:1"])
        .max_connections_per_node(1)
        .dialer(dialer.clone())
        .observer(observer.clone())
        .build()
        .unwrap();
    let ctx = Context::with_timeout(WAIT);

    dialer.fail("a:1");
    for _ in 0..3 {
        let err = pool.get(&ctx, "a:1").await.unwrap_err();
        assert!(err.is_transient());
    }
    assert_eq!(pool.status("a:1").unwrap().total, 0);
    // Other addresses are unaffected.
    let b = pool.get(&ctx, "b:1").await.unwrap();

    dialer.recover("a:1");
    let a = pool.get(&ctx, "a:1").await.unwrap();
    assert_eq!(dialer.dial_count(), 5);
    assert_eq!(
        observer.count(|e| matches!(e, PoolEvent::Created { .. })),
        2
    );

    drop((a, b));
}

// =============================================================================
// Blocking and Wakeup
// =============================================================================

#[tokio::test]
async fn test_pool_two_nodes_scenario() {
    let node_a = mock_server().await;
    let node_b = mock_server().await;
    let (a, b) = (node_a.addr_string(), node_b.addr_string());
    let pool = tcp_pool(&[a.clone(), b.clone()], 2);
    let ctx = Context::background();

    let first = pool.get(&ctx, &a).await.unwrap();
    let second = pool.get(&ctx, &a).await.unwrap();
    node_a.wait_for_accepted(2).await;

    let mut third = tokio_test::task::spawn(pool.get(&ctx, &a));
    assert_pending!(third.poll());

    let released = second.id();
    second.release().unwrap();
    assert!(third.is_woken());
    let third = assert_ready!(third.poll()).unwrap();
    assert_eq!(third.id(), released, "Waiter should reuse the released connection");
    assert_eq!(node_a.accepted_count(), 2);
    assert_eq!(node_b.accepted_count(), 0);

    pool.close().await;
    tokio::time::timeout(WAIT, node_a.wait_for_closed(2))
        .await
        .expect("Both connections should be closed");
    assert!(first.is_closed());
    assert!(third.is_closed());
}

#[tokio::test]
async fn test_pool_cancel_from_another_task() {
    let dialer = DuplexDialer::new();
    let pool = Pool::builder()
        .address("a:1")
        .max_connections_per_node(1)
        .dialer(dialer.clone())
        .build()
        .unwrap();

    let _held = pool.get(&Context::background(), "a:1").await.unwrap();

    let ctx = Context::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = pool.get(&ctx, "a:1").await.unwrap_err();
    assert_eq!(err.context_error(), Some(ContextError::Cancelled));
    assert_eq!(dialer.dial_count(), 1);
}

#[tokio::test]
async fn test_pool_connection_timeout() {
    let dialer = DuplexDialer::new();
    let pool = Pool::builder()
        .address("a:1")
        .max_connections_per_node(1)
        .dialer(dialer)
        .build()
        .unwrap();

    let _held = pool.get(&Context::background(), "a:1").await.unwrap();

    let start = tokio::time::Instant::now();
    let err = pool
        .get(&Context::with_timeout(Duration::from_millis(50)), "a:1")
        .await
        .unwrap_err();

    assert_eq!(err.context_error(), Some(ContextError::DeadlineExceeded));
    assert!(start.elapsed() < WAIT);
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_concurrent_access() {
    let server = mock_server().await;
    let addr = server.addr_string();
    let pool = tcp_pool(&[addr.clone()], 3);

    let success_count = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();

    for i in 0..10 {
        let pool = pool.clone();
        let addr = addr.clone();
        let success_count = success_count.clone();

        handles.push(tokio::spawn(async move {
            let mut conn = pool
                .get(&Context::with_timeout(WAIT), &addr)
                .await
                .expect("Failed to get connection");

            let request = format!("task {i}\r\n");
            conn.write_all(request.as_bytes()).await.unwrap();
            conn.flush().await.unwrap();
            let mut line = String::new();
            conn.read_line(&mut line).await.unwrap();
            assert_eq!(line, request);

            conn.release().unwrap();
            success_count.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for handle in handles {
        handle.await.expect("Task panicked");
    }

    assert_eq!(success_count.load(Ordering::Relaxed), 10);
    assert!(server.accepted_count() <= 3, "Cap must bound dials");

    pool.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_concurrent_stress_test() {
    const MAX: u32 = 4;
    let dialer = DuplexDialer::new();
    let pool = Pool::builder()
        .addresses(["a:1", "b:1"])
        .max_connections_per_node(MAX)
        .dialer(dialer.clone())
        .build()
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..50 {
        let pool = pool.clone();
        let addr = if i % 2 == 0 { "a:1" } else { "b:1" };

        handles.push(tokio::spawn(async move {
            for _ in 0..20 {
                let conn = pool
                    .get(&Context::with_timeout(WAIT), addr)
                    .await
                    .expect("Failed to get connection");

                let status = pool.status(addr).unwrap();
                assert!(status.total + status.dialing <= MAX);
                assert_eq!(conn.addr(), addr);

                tokio::task::yield_now().await;
                conn.release().unwrap();
            }
        }));
    }

    for handle in handles {
        handle.await.expect("Task panicked");
    }

    assert!(dialer.dial_count() <= 2 * MAX as usize);
    for addr in ["a:1", "b:1"] {
        let status = pool.status(addr).unwrap();
        assert_eq!(status.in_use, 0);
        assert!(status.available <= MAX);
    }

    pool.close().await;
}

// =============================================================================
// Close and Detach
// =============================================================================

#[tokio::test]
async fn test_pool_close_drains_everything() {
    let dialer = DuplexDialer::new();
    let observer = RecordingObserver::new();
    let pool = Pool::builder()
        .addresses(["a:1", "b:1"])
        .max_connections_per_node(2)
        .dialer(dialer.clone())
        .observer(observer.clone())
        .build()
        .unwrap();
    let ctx = Context::background();

    let idle = pool.get(&ctx, "a:1").await.unwrap();
    let _held_a = pool.get(&ctx, "a:1").await.unwrap();
    let _held_b = pool.get(&ctx, "b:1").await.unwrap();
    idle.release().unwrap();

    pool.close().await;

    let mut peers = dialer.take_peers();
    assert_eq!(peers.len(), 3);
    for peer in &mut peers {
        let shut = tokio::time::timeout(WAIT, peer.is_shut_down()).await;
        assert!(shut.unwrap(), "{} was not shut down", peer.addr);
    }
    assert!(observer.events().contains(&PoolEvent::Closed { connections: 3 }));
    assert!(matches!(
        pool.get(&ctx, "a:1").await,
        Err(PoolError::PoolClosed)
    ));
}

#[tokio::test]
async fn test_pool_close_interrupts_in_flight_read() {
    let server = MockServer::builder()
        .with_response("stall", MockResponse::silent())
        .build()
        .await
        .unwrap();
    let addr = server.addr_string();
    let pool = tcp_pool(&[addr.clone()], 1);

    let mut conn = pool.get(&Context::with_timeout(WAIT), &addr).await.unwrap();
    conn.write_all(b"stall\r\n").await.unwrap();
    conn.flush().await.unwrap();

    let reader = tokio::spawn(async move {
        let mut line = String::new();
        conn.read_line(&mut line).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    pool.close().await;

    let err = tokio::time::timeout(WAIT, reader)
        .await
        .expect("read should be interrupted")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
    tokio::time::timeout(WAIT, server.wait_for_closed(1))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_pool_detach_connection() {
    let server = mock_server().await;
    let addr = server.addr_string();
    let observer = RecordingObserver::new();
    let pool = Pool::builder()
        .address(addr.clone())
        .max_connections_per_node(1)
        .observer(observer.clone())
        .build()
        .unwrap();

    let conn = pool.get(&Context::with_timeout(WAIT), &addr).await.unwrap();
    let id = conn.id();
    let mut stream = conn.detach().unwrap();

    assert_eq!(pool.status(&addr).unwrap().total, 0);
    assert!(observer.events().contains(&PoolEvent::Detached {
        addr: addr.clone(),
        id
    }));

    stream.write_all(b"ping\r\n").await.unwrap();
    stream.flush().await.unwrap();
    let mut buf = [0u8; 6];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping\r\n");

    // The freed slot allows a fresh dial.
    let fresh = pool.get(&Context::with_timeout(WAIT), &addr).await.unwrap();
    assert_ne!(fresh.id(), id);
    assert_eq!(server.accepted_count(), 2);

    pool.close().await;
}

// =============================================================================
// Observability
// =============================================================================

#[tokio::test]
async fn test_pool_observer_events() {
    let dialer = DuplexDialer::new();
    let observer = RecordingObserver::new();
    let pool = Pool::builder()
        .address("a:1")
        .max_connections_per_node(0)
        .max_connections_per_node(1)
        .dialer(dialer)
        .observer(observer.clone())
        .build()
        .unwrap();

    let conn = pool.get(&Context::background(), "a:1").await.unwrap();
    let id = conn.id();

    let ctx = Context::background();
    let mut waiter = tokio_test::task::spawn(pool.get(&ctx, "a:1"));
    assert_pending!(waiter.poll());
    conn.release().unwrap();
    let again = assert_ready!(waiter.poll()).unwrap();
    assert_eq!(again.id(), id);

    let events = observer.events();
    assert_eq!(
        events,
        vec![
            PoolEvent::InvalidConfig {
                option: "max_connections_per_node".into()
            },
            PoolEvent::Created {
                addr: "a:1".into(),
                id
            },
            PoolEvent::Waiting { addr: "a:1".into() },
            PoolEvent::Returned {
                addr: "a:1".into(),
                id,
                idle: 1
            },
            PoolEvent::Signalled { addr: "a:1".into() },
        ]
    );
}
