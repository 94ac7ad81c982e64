//! Transport dialing.
//!
//! The pool never opens sockets itself. It asks a [`Dialer`] for a fresh
//! transport whenever an address is below capacity and has nothing idle.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default time allowed for a TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A bidirectional byte stream the pool can hold.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + Sync {}

/// Type-erased transport returned by a [`Dialer`].
pub type BoxedTransport = Box<dyn Transport>;

/// Establishes new transports to pool addresses.
///
/// Uses `#[async_trait]` so the pool can hold it as `Arc<dyn Dialer>`.
#[async_trait::async_trait]
pub trait Dialer: Send + Sync {
    /// Open a new transport to `addr`.
    async fn dial(&self, addr: &str) -> io::Result<BoxedTransport>;
}

/// Plain TCP dialer.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
    nodelay: bool,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            nodelay: true,
        }
    }
}

impl TcpDialer {
    /// Create a dialer with the default connect timeout and `TCP_NODELAY` on.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Enable or disable `TCP_NODELAY` on new sockets.
    #[must_use]
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }
}

#[async_trait::async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> io::Result<BoxedTransport> {
        tracing::debug!("establishing TCP connection to {}", addr);
        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", self.connect_timeout),
                )
            })??;

        if self.nodelay {
            stream.set_nodelay(true)?;
        }

        Ok(Box::new(stream))
    }
}
