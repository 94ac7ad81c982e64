//! In-memory dialer backed by `tokio::io::duplex` pipes.
//!
//! Every successful dial hands the pool one end of a fresh pipe and keeps the
//! other end as a [`DuplexPeer`], so tests can talk to a connection or check
//! that the pool shut it down.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use nodepool::{BoxedTransport, Dialer};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, DuplexStream};

/// Pipe buffer size for each dialed connection.
pub const DEFAULT_PIPE_CAPACITY: usize = 4096;

/// Server end of a dialed pipe.
#[derive(Debug)]
pub struct DuplexPeer {
    /// Address the pool dialed.
    pub addr: String,
    /// Server side of the pipe.
    pub stream: DuplexStream,
}

impl DuplexPeer {
    /// Check whether the client side has been shut down.
    ///
    /// Drains any buffered bytes and waits for end-of-stream.
    pub async fn is_shut_down(&mut self) -> bool {
        let mut sink = Vec::new();
        self.stream.read_to_end(&mut sink).await.is_ok()
    }
}

#[derive(Default)]
struct Shared {
    dials: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    peers: Mutex<Vec<DuplexPeer>>,
}

/// Dialer that creates in-memory pipes instead of sockets.
///
/// Clones share state, so a test can keep one clone and hand another to the
/// pool builder.
#[derive(Clone, Default)]
pub struct DuplexDialer {
    shared: Arc<Shared>,
}

impl DuplexDialer {
    /// Create a dialer where every address succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make dials to `addr` fail with `ConnectionRefused`.
    pub fn fail(&self, addr: impl Into<String>) {
        self.shared.failing.lock().insert(addr.into());
    }

    /// Let dials to `addr` succeed again.
    pub fn recover(&self, addr: &str) {
        self.shared.failing.lock().remove(addr);
    }

    /// Number of dial attempts, including failed ones.
    pub fn dial_count(&self) -> usize {
        self.shared.dials.load(Ordering::SeqCst)
    }

    /// Take the server ends of every pipe dialed so far.
    pub fn take_peers(&self) -> Vec<DuplexPeer> {
        std::mem::take(&mut *self.shared.peers.lock())
    }
}

#[async_trait::async_trait]
impl Dialer for DuplexDialer {
    async fn dial(&self, addr: &str) -> io::Result<BoxedTransport> {
        self.shared.dials.fetch_add(1, Ordering::SeqCst);
        if self.shared.failing.lock().contains(addr) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{addr} refused"),
            ));
        }

        let (client, server) = tokio::io::duplex(DEFAULT_PIPE_CAPACITY);
        self.shared.peers.lock().push(DuplexPeer {
            addr: addr.to_string(),
            stream: server,
        });
        Ok(Box::new(client))
    }
}
