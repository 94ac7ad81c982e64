//! # nodepool-testing
//!
//! Test infrastructure for `nodepool`.
//!
//! ## Features
//!
//! - Mock TCP server that counts accepted and closed connections
//! - In-memory dialer backed by duplex pipes (no sockets required)
//! - Recording observer for asserting on pool events
//!
//! ## Example
//!
//! ```rust,ignore
//! use nodepool::{Context, Pool};
//! use nodepool_testing::{DuplexDialer, RecordingObserver};
//!
//! #[tokio::test]
//! async fn test_with_pipes() {
//!     let dialer = DuplexDialer::new();
//!     let pool = Pool::builder()
//!         .address("a:1")
//!         .dialer(dialer.clone())
//!         .observer(RecordingObserver::new())
//!         .build()
//!         .unwrap();
//!
//!     let conn = pool.get(&Context::background(), "a:1").await.unwrap();
//!     assert_eq!(dialer.dial_count(), 1);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod duplex;
pub mod mock_server;
pub mod recorder;

pub use duplex::{DuplexDialer, DuplexPeer};
pub use mock_server::{
    MockResponse, MockServer, MockServerBuilder, MockServerConfig, MockServerError,
};
pub use recorder::{PoolEvent, RecordingObserver};
