//! Mock line-oriented TCP server for pool tests.
//!
//! The server accepts any number of connections, answers each request line
//! with a configured response (or echoes it back), and keeps count of how
//! many connections were accepted and how many the client side has closed.
//! The closed count is what pool teardown tests assert on.
//!
//! ## Example
//!
//! ```rust,ignore
//! use nodepool_testing::mock_server::{MockResponse, MockServer};
//!
//! #[tokio::test]
//! async fn test_roundtrip() {
//!     let server = MockServer::builder()
//!         .with_response("version", MockResponse::line("VERSION 1.6.0"))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let addr = server.addr_string();
//!     // Point a pool at addr...
//! }
//! ```

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, broadcast};

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// Mock response configuration.
#[derive(Clone)]
pub enum MockResponse {
    /// Send the request line back unchanged.
    Echo,

    /// Send fixed bytes.
    Raw(Bytes),

    /// Close the connection without answering.
    Hangup,

    /// Execute a custom handler.
    Custom(Arc<dyn Fn(&str) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Echo => f.write_str("Echo"),
            Self::Raw(data) => f.debug_tuple("Raw").field(&data.len()).finish(),
            Self::Hangup => f.write_str("Hangup"),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// Respond with a single CRLF-terminated line.
    pub fn line(text: impl AsRef<str>) -> Self {
        Self::Raw(Bytes::from(format!("{}\r\n", text.as_ref())))
    }

    /// Read the request and send nothing back.
    pub fn silent() -> Self {
        Self::Raw(Bytes::new())
    }

    /// Respond with a handler computed from the request line.
    pub fn custom<F>(handler: F) -> Self
    where
        F: Fn(&str) -> MockResponse + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(handler))
    }
}

/// Configuration for the mock server.
#[derive(Debug, Default)]
pub struct MockServerConfig {
    /// Pre-configured responses keyed by request line (without line ending).
    responses: HashMap<String, MockResponse>,
    /// Response for unmatched requests; echo when unset.
    default_response: Option<MockResponse>,
}

/// Builder for [`MockServer`].
#[derive(Debug, Default)]
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a response for a specific request line.
    pub fn with_response(mut self, request: impl Into<String>, response: MockResponse) -> Self {
        self.config.responses.insert(request.into(), response);
        self
    }

    /// Set the default response for unmatched requests.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = Some(response);
        self
    }

    /// Build and start the mock server.
    pub async fn build(self) -> Result<MockServer> {
        MockServer::start(self.config).await
    }
}

#[derive(Default)]
struct Stats {
    accepted: AtomicUsize,
    closed: AtomicUsize,
    changed: Notify,
}

impl Stats {
    fn bump(&self, counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }
}

/// A mock TCP server for testing.
pub struct MockServer {
    /// Server address.
    addr: SocketAddr,
    /// Shutdown signal sender.
    shutdown_tx: broadcast::Sender<()>,
    stats: Arc<Stats>,
}

impl MockServer {
    /// Create a new builder for the mock server.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the mock server on an available port.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let config = Arc::new(config);
        let stats = Arc::new(Stats::default());

        let server = Self {
            addr,
            shutdown_tx: shutdown_tx.clone(),
            stats: Arc::clone(&stats),
        };

        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _peer_addr)) => {
                                let config = Arc::clone(&config);
                                let stats = Arc::clone(&stats);
                                tokio::spawn(async move {
                                    stats.bump(&stats.accepted);
                                    if let Err(e) = handle_connection(stream, config).await {
                                        tracing::debug!("Connection error: {}", e);
                                    }
                                    stats.bump(&stats.closed);
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Ok(server)
    }

    /// Get the server's listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the listening address as a `host:port` string.
    pub fn addr_string(&self) -> String {
        self.addr.to_string()
    }

    /// Number of connections accepted so far.
    pub fn accepted_count(&self) -> usize {
        self.stats.accepted.load(Ordering::SeqCst)
    }

    /// Number of connections the client side has closed.
    pub fn closed_count(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    /// Number of connections currently open.
    pub fn connection_count(&self) -> usize {
        self.accepted_count().saturating_sub(self.closed_count())
    }

    /// Wait until at least `n` connections have been accepted.
    pub async fn wait_for_accepted(&self, n: usize) {
        self.wait_until(|| self.accepted_count() >= n).await;
    }

    /// Wait until at least `n` connections have been closed by the client.
    pub async fn wait_for_closed(&self, n: usize) {
        self.wait_until(|| self.closed_count() >= n).await;
    }

    async fn wait_until(&self, done: impl Fn() -> bool) {
        loop {
            let changed = self.stats.changed.notified();
            if done() {
                return;
            }
            changed.await;
        }
    }

    /// Stop the server.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle a single client connection until it closes.
async fn handle_connection(stream: TcpStream, config: Arc<MockServerConfig>) -> Result<()> {
    let mut stream = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        if stream.read_line(&mut line).await? == 0 {
            // Client disconnected
            return Ok(());
        }
        let request = line.trim_end_matches(['\r', '\n']);

        let response = config
            .responses
            .get(request)
            .or(config.default_response.as_ref())
            .cloned()
            .unwrap_or(MockResponse::Echo);
        let response = match response {
            MockResponse::Custom(handler) => handler(request),
            other => other,
        };

        match response {
            MockResponse::Echo | MockResponse::Custom(_) => {
                stream.get_mut().write_all(line.as_bytes()).await?;
            }
            MockResponse::Raw(data) => stream.get_mut().write_all(&data).await?,
            MockResponse::Hangup => return Ok(()),
        }
    }
}
