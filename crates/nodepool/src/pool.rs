//! Connection pool implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::config::PoolConfig;
use crate::connection::{Connection, Link};
use crate::context::Context;
use crate::dialer::{Dialer, TcpDialer};
use crate::error::PoolError;
use crate::observer::{PoolObserver, TracingObserver};

/// A bounded connection pool partitioned by destination address.
///
/// Each address gets its own free list, in-use set and capacity signal. A
/// caller that finds its address at capacity waits until another caller
/// releases a connection there, or until its [`Context`] ends.
///
/// `Pool` is a cheap handle; clones share the same state.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    addrs: Vec<Arc<str>>,
    signals: HashMap<Arc<str>, CapacitySignal>,
    state: Mutex<PoolState>,
    dialer: Arc<dyn Dialer>,
    observer: Arc<dyn PoolObserver>,
    next_id: AtomicU64,
}

struct PoolState {
    closed: bool,
    nodes: HashMap<Arc<str>, NodeState>,
}

/// Bookkeeping for one address.
///
/// `free.len() + in_use.len() + dialing` never exceeds the per-node cap.
struct NodeState {
    addr: Arc<str>,
    /// Idle connections; the most recently released is last.
    free: Vec<IdleConnection>,
    in_use: HashMap<u64, Arc<Link>>,
    /// Slots reserved by dials that have not finished yet.
    dialing: u32,
}

struct IdleConnection {
    id: u64,
    link: Arc<Link>,
}

/// Counting wakeup signal bounded by the per-node cap.
///
/// Behaves like a buffered channel of capacity `max`: a notify never blocks,
/// and notifications past `max` pending tokens are dropped since enough
/// waiters will already be woken.
struct CapacitySignal {
    tokens: Semaphore,
    max: usize,
}

impl CapacitySignal {
    fn new(max: usize) -> Self {
        Self {
            tokens: Semaphore::new(0),
            max,
        }
    }

    /// Must be called with the pool lock held.
    fn notify(&self) {
        if self.tokens.available_permits() < self.max {
            self.tokens.add_permits(1);
        }
    }

    async fn wait(&self) -> Result<(), PoolError> {
        let permit = self
            .tokens
            .acquire()
            .await
            .map_err(|_| PoolError::PoolClosed)?;
        permit.forget();
        Ok(())
    }

    fn close(&self) {
        self.tokens.close();
    }
}

/// Outcome of one pass over the non-blocking part of `get`.
enum Acquire<'a> {
    Ready(Connection),
    Dial(DialReservation<'a>),
    Wait(&'a CapacitySignal),
}

/// A capacity slot held while a dial is in flight.
///
/// Dropping it unfinished gives the slot back and wakes one waiter.
struct DialReservation<'a> {
    pool: &'a PoolInner,
    addr: Arc<str>,
    armed: bool,
}

impl DialReservation<'_> {
    fn finish(mut self, state: &mut PoolState) {
        self.armed = false;
        if let Some(node) = state.nodes.get_mut(&self.addr) {
            node.dialing = node.dialing.saturating_sub(1);
        }
    }
}

impl Drop for DialReservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.pool.state.lock();
        if let Some(node) = state.nodes.get_mut(&self.addr) {
            node.dialing = node.dialing.saturating_sub(1);
        }
        if let Some(signal) = self.pool.signals.get(&self.addr) {
            signal.notify();
        }
    }
}

impl PoolInner {
    fn signal(&self, addr: &str) -> Result<&CapacitySignal, PoolError> {
        self.signals
            .get(addr)
            .ok_or_else(|| PoolError::UnknownAddress(addr.to_string()))
    }

    /// Run the locked decision steps of `get`.
    fn try_acquire(self: &Arc<Self>, addr: &str) -> Result<Acquire<'_>, PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }
        let signal = self.signal(addr)?;
        let node = state
            .nodes
            .get_mut(addr)
            .ok_or_else(|| PoolError::UnknownAddress(addr.to_string()))?;

        if let Some(idle) = node.free.pop() {
            node.in_use.insert(idle.id, Arc::clone(&idle.link));
            let conn = Connection::new(
                idle.id,
                Arc::clone(&node.addr),
                idle.link,
                Arc::downgrade(self),
            );
            return Ok(Acquire::Ready(conn));
        }

        let live = node.in_use.len() + node.dialing as usize;
        if live < self.config.max_connections_per_node as usize {
            node.dialing += 1;
            return Ok(Acquire::Dial(DialReservation {
                pool: self,
                addr: Arc::clone(&node.addr),
                armed: true,
            }));
        }

        Ok(Acquire::Wait(signal))
    }

    fn take_idle(self: &Arc<Self>, addr: &str) -> Result<Option<Connection>, PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }
        let node = state
            .nodes
            .get_mut(addr)
            .ok_or_else(|| PoolError::UnknownAddress(addr.to_string()))?;

        Ok(node.free.pop().map(|idle| {
            node.in_use.insert(idle.id, Arc::clone(&idle.link));
            Connection::new(
                idle.id,
                Arc::clone(&node.addr),
                idle.link,
                Arc::downgrade(self),
            )
        }))
    }

    async fn dial(
        self: &Arc<Self>,
        ctx: &Context,
        reservation: DialReservation<'_>,
    ) -> Result<Connection, PoolError> {
        let addr = Arc::clone(&reservation.addr);
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let transport = tokio::select! {
            biased;
            err = ctx.done() => return Err(err.into()),
            result = self.dialer.dial(&addr) => result.map_err(|source| PoolError::Dial {
                addr: addr.to_string(),
                source,
            })?,
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let link = Arc::new(Link::new(transport));

        let registered = {
            let mut state = self.state.lock();
            reservation.finish(&mut state);
            if state.closed {
                false
            } else if let Some(node) = state.nodes.get_mut(&addr) {
                node.in_use.insert(id, Arc::clone(&link));
                true
            } else {
                false
            }
        };

        if !registered {
            let _ = link.close().await;
            return Err(PoolError::PoolClosed);
        }

        self.observer.connection_created(&addr, id);
        Ok(Connection::new(id, addr, link, Arc::downgrade(self)))
    }

    /// Move a checked-out connection back to the tail of its free list.
    pub(crate) fn release_connection(&self, conn: &Connection) -> Result<(), PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }
        let node = state
            .nodes
            .get_mut(conn.addr())
            .ok_or_else(|| PoolError::UnknownAddress(conn.addr().to_string()))?;

        let link = match node.in_use.remove(&conn.id()) {
            Some(link) if Arc::ptr_eq(&link, conn.link()) => link,
            Some(other) => {
                node.in_use.insert(conn.id(), other);
                return Err(not_in_use(conn));
            }
            None => return Err(not_in_use(conn)),
        };

        node.free.push(IdleConnection {
            id: conn.id(),
            link,
        });
        let idle = node.free.len();
        self.signal(conn.addr())?.notify();
        self.observer.connection_returned(conn.addr(), conn.id(), idle);
        Ok(())
    }

    /// Forget a checked-out connection and free its slot.
    pub(crate) fn detach_connection(&self, conn: &Connection) -> Result<(), PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }
        let node = state
            .nodes
            .get_mut(conn.addr())
            .ok_or_else(|| PoolError::UnknownAddress(conn.addr().to_string()))?;

        match node.in_use.remove(&conn.id()) {
            Some(link) if Arc::ptr_eq(&link, conn.link()) => {}
            Some(other) => {
                node.in_use.insert(conn.id(), other);
                return Err(not_in_use(conn));
            }
            None => return Err(not_in_use(conn)),
        }

        self.signal(conn.addr())?.notify();
        self.observer.connection_detached(conn.addr(), conn.id());
        Ok(())
    }
}

fn not_in_use(conn: &Connection) -> PoolError {
    PoolError::NotInUse {
        addr: conn.addr().to_string(),
        id: conn.id(),
    }
}

impl Pool {
    /// Create a builder for a pool.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Create a pool over `addrs` with a plain TCP dialer.
    pub fn new<I, S>(addrs: I, config: PoolConfig) -> Result<Self, PoolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder().addresses(addrs).config(config).build()
    }

    /// Get a connection to `addr`.
    ///
    /// Returns the most recently released idle connection if there is one.
    /// Otherwise dials a new connection when the address is below capacity.
    /// At capacity, waits until a connection to `addr` is released or `ctx`
    /// ends. A wakeup only means a slot may be free, so the whole check runs
    /// again after every signal.
    pub async fn get(&self, ctx: &Context, addr: &str) -> Result<Connection, PoolError> {
        loop {
            let signal = match self.inner.try_acquire(addr)? {
                Acquire::Ready(conn) => return Ok(conn),
                Acquire::Dial(reservation) => return self.inner.dial(ctx, reservation).await,
                Acquire::Wait(signal) => signal,
            };

            if let Some(err) = ctx.err() {
                return Err(err.into());
            }

            self.inner.observer.waiting_for_capacity(addr);
            tokio::select! {
                biased;
                err = ctx.done() => return Err(err.into()),
                result = signal.wait() => result?,
            }
            self.inner.observer.capacity_signalled(addr);
        }
    }

    /// Get an idle connection to `addr` without dialing or waiting.
    ///
    /// Returns `Ok(None)` if the address has nothing idle.
    pub fn try_get(&self, addr: &str) -> Result<Option<Connection>, PoolError> {
        self.inner.take_idle(addr)
    }

    /// Return a connection to the pool.
    ///
    /// Fails with [`PoolError::NotInUse`] if the connection was not checked
    /// out from this pool. A connection from another pool goes back to that
    /// pool when dropped.
    pub fn release(&self, mut conn: Connection) -> Result<(), PoolError> {
        if !conn.belongs_to(&self.inner) {
            return Err(not_in_use(&conn));
        }
        conn.mark_returned();
        self.inner.release_connection(&conn)
    }

    /// Close every connection the pool tracks, idle or in use.
    ///
    /// Connections are closed concurrently. Failures on individual
    /// connections are reported to the observer and do not stop the rest. Waiters wake with
    /// [`PoolError::PoolClosed`]. Calling this more than once is a no-op.
    pub async fn close(&self) {
        let drained: Vec<(Arc<str>, u64, Arc<Link>)> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;

            let mut drained = Vec::new();
            for node in state.nodes.values_mut() {
                for idle in node.free.drain(..) {
                    drained.push((Arc::clone(&node.addr), idle.id, idle.link));
                }
                for (id, link) in node.in_use.drain() {
                    drained.push((Arc::clone(&node.addr), id, link));
                }
            }
            drained
        };

        for signal in self.inner.signals.values() {
            signal.close();
        }

        let count = drained.len();
        let observer = &self.inner.observer;
        join_all(drained.into_iter().map(|(addr, id, link)| async move {
            if let Err(e) = link.close().await {
                observer.close_failed(&addr, id, &e);
            }
        }))
        .await;
        observer.pool_closed(count);
    }

    /// Get the status of one address, or `None` if the pool does not know it.
    #[must_use]
    pub fn status(&self, addr: &str) -> Option<PoolStatus> {
        let state = self.inner.state.lock();
        state.nodes.get(addr).map(|node| {
            let available = node.free.len() as u32;
            let in_use = node.in_use.len() as u32;
            PoolStatus {
                available,
                in_use,
                dialing: node.dialing,
                total: available + in_use,
                max: self.inner.config.max_connections_per_node,
            }
        })
    }

    /// Addresses this pool was built with.
    #[must_use]
    pub fn addresses(&self) -> &[Arc<str>] {
        &self.inner.addrs
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("addrs", &self.inner.addrs)
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Status information for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently in use.
    pub in_use: u32,
    /// Number of dials in progress.
    pub dialing: u32,
    /// Total number of live connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

/// Builder for [`Pool`].
pub struct PoolBuilder {
    addrs: Vec<String>,
    config: PoolConfig,
    dialer: Option<Arc<dyn Dialer>>,
    observer: Option<Arc<dyn PoolObserver>>,
    rejected: Vec<(&'static str, String)>,
}

impl PoolBuilder {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            addrs: Vec::new(),
            config: PoolConfig::default(),
            dialer: None,
            observer: None,
            rejected: Vec::new(),
        }
    }

    /// Add one destination address.
    #[must_use]
    pub fn address(mut self, addr: impl Into<String>) -> Self {
        self.addrs.push(addr.into());
        self
    }

    /// Add several destination addresses.
    #[must_use]
    pub fn addresses<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addrs.extend(addrs.into_iter().map(Into::into));
        self
    }

    /// Set the maximum number of connections per address.
    ///
    /// Zero is rejected: the previous value is kept and the rejection is
    /// reported to the observer when the pool is built.
    #[must_use]
    pub fn max_connections_per_node(mut self, count: u32) -> Self {
        if count == 0 {
            self.rejected.push((
                "max_connections_per_node",
                format!(
                    "must be greater than 0, keeping {}",
                    self.config.max_connections_per_node
                ),
            ));
            return self;
        }
        self.config.max_connections_per_node = count;
        self
    }

    /// Replace the whole configuration.
    ///
    /// An invalid configuration is rejected the same way as an invalid
    /// individual option.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        if let Err(e) = config.validate() {
            self.rejected.push(("config", e.to_string()));
            return self;
        }
        self.config = config;
        self
    }

    /// Set the dialer used to open new connections.
    #[must_use]
    pub fn dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.dialer = Some(Arc::new(dialer));
        self
    }

    /// Set the observer that receives pool events.
    #[must_use]
    pub fn observer(mut self, observer: impl PoolObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Build the pool.
    ///
    /// No connections are opened here; they are dialed on first demand.
    pub fn build(self) -> Result<Pool, PoolError> {
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(TracingObserver));
        for (option, reason) in &self.rejected {
            observer.invalid_config(option, reason);
        }

        self.config.validate()?;
        if self.addrs.is_empty() {
            return Err(PoolError::Configuration(
                "at least one address is required".into(),
            ));
        }

        let max = self.config.max_connections_per_node as usize;
        let mut addrs: Vec<Arc<str>> = Vec::with_capacity(self.addrs.len());
        let mut signals = HashMap::with_capacity(self.addrs.len());
        let mut nodes = HashMap::with_capacity(self.addrs.len());
        for addr in self.addrs {
            if nodes.contains_key(addr.as_str()) {
                continue;
            }
            let addr: Arc<str> = Arc::from(addr);
            signals.insert(Arc::clone(&addr), CapacitySignal::new(max));
            nodes.insert(
                Arc::clone(&addr),
                NodeState {
                    addr: Arc::clone(&addr),
                    free: Vec::new(),
                    in_use: HashMap::new(),
                    dialing: 0,
                },
            );
            addrs.push(addr);
        }

        Ok(Pool {
            inner: Arc::new(PoolInner {
                config: self.config,
                addrs,
                signals,
                state: Mutex::new(PoolState {
                    closed: false,
                    nodes,
                }),
                dialer: self
                    .dialer
                    .unwrap_or_else(|| Arc::new(TcpDialer::default())),
                observer,
                next_id: AtomicU64::new(1),
            }),
        })
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
