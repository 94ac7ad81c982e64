//! Observer that records pool events for assertions.

use std::io;
use std::sync::Arc;

use nodepool::PoolObserver;
use parking_lot::Mutex;

/// A pool event captured by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A connection was dialed.
    Created {
        /// Address.
        addr: String,
        /// Connection id.
        id: u64,
    },
    /// A caller started waiting for capacity.
    Waiting {
        /// Address.
        addr: String,
    },
    /// A waiting caller was woken.
    Signalled {
        /// Address.
        addr: String,
    },
    /// A connection went back to its free list.
    Returned {
        /// Address.
        addr: String,
        /// Connection id.
        id: u64,
        /// Free list length after the return.
        idle: usize,
    },
    /// A connection was detached.
    Detached {
        /// Address.
        addr: String,
        /// Connection id.
        id: u64,
    },
    /// A configuration value was rejected.
    InvalidConfig {
        /// Option name.
        option: String,
    },
    /// Closing a connection failed.
    CloseFailed {
        /// Address.
        addr: String,
        /// Connection id.
        id: u64,
    },
    /// The pool was closed.
    Closed {
        /// Number of connections closed.
        connections: usize,
    },
}

/// Capturing [`PoolObserver`].
///
/// Clones share the same event log.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<PoolEvent>>>,
}

impl RecordingObserver {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event recorded so far.
    pub fn events(&self) -> Vec<PoolEvent> {
        self.events.lock().clone()
    }

    /// Count events matching a predicate.
    pub fn count(&self, pred: impl Fn(&PoolEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    fn push(&self, event: PoolEvent) {
        self.events.lock().push(event);
    }
}

impl PoolObserver for RecordingObserver {
    fn connection_created(&self, addr: &str, id: u64) {
        self.push(PoolEvent::Created {
            addr: addr.to_string(),
            id,
        });
    }

    fn waiting_for_capacity(&self, addr: &str) {
        self.push(PoolEvent::Waiting {
            addr: addr.to_string(),
        });
    }

    fn capacity_signalled(&self, addr: &str) {
        self.push(PoolEvent::Signalled {
            addr: addr.to_string(),
        });
    }

    fn connection_returned(&self, addr: &str, id: u64, idle: usize) {
        self.push(PoolEvent::Returned {
            addr: addr.to_string(),
            id,
            idle,
        });
    }

    fn connection_detached(&self, addr: &str, id: u64) {
        self.push(PoolEvent::Detached {
            addr: addr.to_string(),
            id,
        });
    }

    fn invalid_config(&self, option: &str, _reason: &str) {
        self.push(PoolEvent::InvalidConfig {
            option: option.to_string(),
        });
    }

    fn close_failed(&self, addr: &str, id: u64, _error: &io::Error) {
        self.push(PoolEvent::CloseFailed {
            addr: addr.to_string(),
            id,
        });
    }

    fn pool_closed(&self, connections: usize) {
        self.push(PoolEvent::Closed { connections });
    }
}
