//! Pool lifecycle events.
//!
//! The pool reports what it does through an injected [`PoolObserver`] rather
//! than a process-wide logger. [`TracingObserver`] is the default and forwards
//! everything to `tracing`.

use std::io;

/// Receives pool lifecycle events.
///
/// Every method has an empty default body. Callbacks run synchronously,
/// some of them while the pool lock is held, so they must not call back into
/// the pool.
pub trait PoolObserver: Send + Sync {
    /// A new connection was dialed.
    fn connection_created(&self, _addr: &str, _id: u64) {}

    /// A caller found the address at capacity and is about to wait.
    fn waiting_for_capacity(&self, _addr: &str) {}

    /// A waiting caller received a capacity signal and will retry.
    fn capacity_signalled(&self, _addr: &str) {}

    /// A connection went back to its free list.
    fn connection_returned(&self, _addr: &str, _id: u64, _idle: usize) {}

    /// A connection left the pool for good.
    fn connection_detached(&self, _addr: &str, _id: u64) {}

    /// A configuration value was rejected and the previous value kept.
    fn invalid_config(&self, _option: &str, _reason: &str) {}

    /// Closing a connection during pool teardown failed.
    fn close_failed(&self, _addr: &str, _id: u64, _error: &io::Error) {}

    /// The pool was closed.
    fn pool_closed(&self, _connections: usize) {}
}

/// Observer that emits `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl PoolObserver for TracingObserver {
    fn connection_created(&self, addr: &str, id: u64) {
        tracing::debug!(addr, id, "created new connection");
    }

    fn waiting_for_capacity(&self, addr: &str) {
        tracing::debug!(addr, "reached connection limit, waiting for a free connection");
    }

    fn capacity_signalled(&self, addr: &str) {
        tracing::debug!(addr, "received capacity signal, retrying acquire");
    }

    fn connection_returned(&self, addr: &str, id: u64, idle: usize) {
        tracing::debug!(addr, id, idle, "returned connection to pool");
    }

    fn connection_detached(&self, addr: &str, id: u64) {
        tracing::debug!(addr, id, "detached connection from pool");
    }

    fn invalid_config(&self, option: &str, reason: &str) {
        tracing::warn!(option, reason, "ignoring invalid pool option");
    }

    fn close_failed(&self, addr: &str, id: u64, error: &io::Error) {
        tracing::warn!(addr, id, error = %error, "failed to close connection");
    }

    fn pool_closed(&self, connections: usize) {
        tracing::info!(connections, "connection pool closed");
    }
}
