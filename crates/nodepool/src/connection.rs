//! Pooled connections.
//!
//! A [`Connection`] is a caller's handle on one transport checked out from the
//! pool. The transport itself lives in a shared [`Link`] so the pool can shut
//! it down during teardown even while a caller holds the handle.

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::dialer::BoxedTransport;
use crate::error::PoolError;
use crate::pool::PoolInner;

/// How long teardown waits for buffered output to drain before shutting down.
pub(crate) const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffered transport owned by a connection.
pub type BufferedTransport = BufStream<BoxedTransport>;

/// Shared transport slot for one connection.
///
/// The stream is behind an async mutex so teardown can take it from a caller.
/// `shutdown` is cancelled first so in-flight I/O returns and the lock frees.
pub(crate) struct Link {
    stream: Mutex<Option<BufferedTransport>>,
    shutdown: CancellationToken,
}

impl Link {
    pub(crate) fn new(transport: BoxedTransport) -> Self {
        Self {
            stream: Mutex::new(Some(BufStream::new(transport))),
            shutdown: CancellationToken::new(),
        }
    }

    /// Flush buffered output, then shut the transport down.
    ///
    /// The flush is best-effort and bounded by [`CLOSE_FLUSH_TIMEOUT`]; only
    /// the shutdown error is returned.
    pub(crate) async fn close(&self) -> io::Result<()> {
        self.shutdown.cancel();
        let mut slot = self.stream.lock().await;
        let Some(mut stream) = slot.take() else {
            return Ok(());
        };
        let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, stream.flush()).await;
        stream.get_mut().shutdown().await
    }

    fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed by pool")
}

/// Run `op`, giving up if the link is shut down first.
async fn interruptible<T>(
    shutdown: &CancellationToken,
    op: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => Err(not_connected()),
        result = op => result,
    }
}

/// A connection checked out from a [`Pool`](crate::Pool).
///
/// Return it with [`release`](Self::release) or
/// [`Pool::release`](crate::Pool::release). Dropping a connection that is
/// still checked out returns it to the pool as well.
pub struct Connection {
    id: u64,
    addr: Arc<str>,
    link: Arc<Link>,
    pool: Weak<PoolInner>,
    checked_out: bool,
}

impl Connection {
    pub(crate) fn new(id: u64, addr: Arc<str>, link: Arc<Link>, pool: Weak<PoolInner>) -> Self {
        Self {
            id,
            addr,
            link,
            pool,
            checked_out: true,
        }
    }

    /// Pool-unique identifier of the underlying transport.
    ///
    /// Two handles with the same id refer to the same transport, so this can
    /// be used to observe reuse.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Address this connection is attached to.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether the pool has shut this connection's transport down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }

    /// Put the connection back in the pool for reuse.
    pub fn release(mut self) -> Result<(), PoolError> {
        self.checked_out = false;
        let pool = self.pool.upgrade().ok_or(PoolError::PoolClosed)?;
        pool.release_connection(&self)
    }

    /// Take the connection out of the pool for good.
    ///
    /// The slot it occupied becomes free and the caller owns the buffered
    /// transport.
    pub fn detach(mut self) -> Result<BufferedTransport, PoolError> {
        self.checked_out = false;
        let pool = self.pool.upgrade().ok_or(PoolError::PoolClosed)?;
        pool.detach_connection(&self)?;

        let link = Arc::clone(&self.link);
        drop(self);
        let link = Arc::try_unwrap(link).map_err(|_| PoolError::PoolClosed)?;
        link.stream.into_inner().ok_or(PoolError::PoolClosed)
    }

    pub(crate) fn link(&self) -> &Arc<Link> {
        &self.link
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<PoolInner>) -> bool {
        std::ptr::eq(self.pool.as_ptr(), Arc::as_ptr(pool))
    }

    pub(crate) fn mark_returned(&mut self) {
        self.checked_out = false;
    }

    /// Write the whole buffer.
    ///
    /// Data is buffered; call [`flush`](Self::flush) to send it.
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut slot = self.link.stream.lock().await;
        let stream = slot.as_mut().ok_or_else(not_connected)?;
        interruptible(&self.link.shutdown, stream.write_all(buf)).await
    }

    /// Flush buffered output to the transport.
    pub async fn flush(&mut self) -> io::Result<()> {
        let mut slot = self.link.stream.lock().await;
        let stream = slot.as_mut().ok_or_else(not_connected)?;
        interruptible(&self.link.shutdown, stream.flush()).await
    }

    /// Read a line, including the trailing newline, into `buf`.
    ///
    /// Returns the number of bytes read; 0 means the peer closed.
    pub async fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        let mut slot = self.link.stream.lock().await;
        let stream = slot.as_mut().ok_or_else(not_connected)?;
        interruptible(&self.link.shutdown, stream.read_line(buf)).await
    }

    /// Read until `delimiter` (inclusive) into `buf`.
    pub async fn read_until(&mut self, delimiter: u8, buf: &mut Vec<u8>) -> io::Result<usize> {
        let mut slot = self.link.stream.lock().await;
        let stream = slot.as_mut().ok_or_else(not_connected)?;
        interruptible(&self.link.shutdown, stream.read_until(delimiter, buf)).await
    }

    /// Fill `buf` exactly.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut slot = self.link.stream.lock().await;
        let stream = slot.as_mut().ok_or_else(not_connected)?;
        interruptible(&self.link.shutdown, stream.read_exact(buf)).await
    }

    /// Read whatever is available into `buf`.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut slot = self.link.stream.lock().await;
        let stream = slot.as_mut().ok_or_else(not_connected)?;
        interruptible(&self.link.shutdown, stream.read(buf)).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("checked_out", &self.checked_out)
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.checked_out {
            return;
        }
        self.checked_out = false;
        if let Some(pool) = self.pool.upgrade() {
            // The pool may already be closed; nothing to return to then.
            let _ = pool.release_connection(self);
        }
    }
}
