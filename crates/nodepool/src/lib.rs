//! # nodepool
//!
//! Bounded, per-destination connection pool for TCP client libraries.
//!
//! The pool is built over a fixed set of server addresses. For each address it
//! keeps a free list of idle connections and a set of checked-out ones, and
//! caps their sum at `max_connections_per_node`. A caller asking for an
//! address at capacity waits until someone releases a connection to that
//! address, or until its [`Context`] is cancelled or times out.
//!
//! ## Features
//!
//! - LIFO reuse of idle connections (the most recently used is handed out first)
//! - Lazy dialing through a pluggable [`Dialer`]
//! - Cancellable, deadline-aware waiting at capacity
//! - Self-release from a [`Connection`], or return-on-drop
//! - Bulk teardown that closes idle and checked-out connections alike
//! - Lifecycle events through an injected [`PoolObserver`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use nodepool::{Context, Pool};
//!
//! let pool = Pool::builder()
//!     .addresses(["10.0.0.1:11211", "10.0.0.2:11211"])
//!     .max_connections_per_node(4)
//!     .build()?;
//!
//! let ctx = Context::with_timeout(Duration::from_secs(2));
//! let mut conn = pool.get(&ctx, "10.0.0.1:11211").await?;
//! conn.write_all(b"version\r\n").await?;
//! conn.flush().await?;
//! conn.release()?;
//!
//! pool.close().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod context;
pub mod dialer;
pub mod error;
pub mod observer;
pub mod pool;

pub use config::PoolConfig;
pub use connection::{BufferedTransport, Connection};
pub use context::{Context, ContextError};
pub use dialer::{BoxedTransport, Dialer, TcpDialer, Transport};
pub use error::PoolError;
pub use observer::{PoolObserver, TracingObserver};
pub use pool::{Pool, PoolBuilder, PoolStatus};
