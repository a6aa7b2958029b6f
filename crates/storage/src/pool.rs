//! Connection Pool
//!
//! Bounds the number of concurrently open storage connections. A semaphore
//! holds one permit per connection slot; an acquired permit travels with the
//! connection inside [`PooledConnection`] and is returned on drop, so a
//! connection is released on every exit path.
//!
//! Connections that failed during use (or report themselves broken) are
//! closed instead of returned; the next acquirer opens a replacement.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use contracts::{Connector, ContractError, StorageConfig, StorageConnection};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::error::StorageError;

/// Connection Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections opened by [`ConnectionPool::connect`]
    pub min_connections: usize,
    /// Upper bound of open connections
    pub max_connections: usize,
    /// Maximum wait of one `acquire`
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 4,
            max_connections: 15,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    pub fn from_storage(config: &StorageConfig) -> Self {
        Self {
            min_connections: config.min_connections,
            max_connections: config.max_connections,
            acquire_timeout: config.acquire_timeout(),
        }
    }
}

/// Pool metrics
#[derive(Debug, Default)]
pub struct PoolMetrics {
    acquired: AtomicU64,
    timeouts: AtomicU64,
    opened: AtomicU64,
    discarded: AtomicU64,
    open: AtomicUsize,
}

impl PoolMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections currently open (idle + in use)
    pub fn open(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }

    /// Get snapshot
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            acquired: self.acquired.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            opened: self.opened.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            open: self.open(),
        }
    }

    fn record_opened(&self) {
        self.opened.fetch_add(1, Ordering::Relaxed);
        self.open.fetch_add(1, Ordering::Relaxed);
    }

    fn record_closed(&self) {
        self.open.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Snapshot of pool metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetricsSnapshot {
    pub acquired: u64,
    pub timeouts: u64,
    pub opened: u64,
    pub discarded: u64,
    pub open: usize,
}

struct PoolInner<C: Connector> {
    connector: C,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<C::Connection>>,
    closed: AtomicBool,
    metrics: PoolMetrics,
}

impl<C: Connector> PoolInner<C> {
    fn idle(&self) -> MutexGuard<'_, Vec<C::Connection>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn in_use(&self) -> usize {
        self.config.max_connections - self.permits.available_permits()
    }

    async fn open_connection(&self) -> Result<C::Connection, ContractError> {
        let conn = self.connector.connect().await?;
        self.metrics.record_opened();
        debug!(connector = %self.connector.name(), open = self.metrics.open(), "connection opened");
        Ok(conn)
    }

    fn release(&self, conn: C::Connection, discard: bool) {
        if discard || conn.is_broken() || self.closed.load(Ordering::Acquire) {
            self.metrics.record_closed();
            if discard || conn.is_broken() {
                self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
                debug!(connector = %self.connector.name(), "broken connection discarded");
            }
            return;
        }
        self.idle().push(conn);
    }
}

/// Bounded pool of storage connections
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Create a pool that opens connections lazily
    pub fn new(connector: C, config: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_connections));
        Self {
            inner: Arc::new(PoolInner {
                connector,
                permits,
                idle: Mutex::new(Vec::with_capacity(config.max_connections)),
                closed: AtomicBool::new(false),
                metrics: PoolMetrics::new(),
                config,
            }),
        }
    }

    /// Create a pool and open `min_connections` connections up front
    ///
    /// # Errors
    /// Any connection failure is a fatal startup error.
    #[instrument(
        name = "connection_pool_connect",
        skip(connector, config),
        fields(connector = %connector.name(), min = config.min_connections, max = config.max_connections)
    )]
    pub async fn connect(connector: C, config: PoolConfig) -> Result<Self, StorageError> {
        let pool = Self::new(connector, config);
        let warm = pool.inner.config.min_connections.min(pool.inner.config.max_connections);

        let mut conns = Vec::with_capacity(warm);
        for _ in 0..warm {
            let conn = pool
                .inner
                .open_connection()
                .await
                .map_err(|source| StorageError::Startup {
                    connector: pool.inner.connector.name().to_string(),
                    source,
                })?;
            conns.push(conn);
        }
        pool.inner.idle().extend(conns);

        info!(open = warm, "connection pool ready");
        Ok(pool)
    }

    /// Take a connection, waiting up to `acquire_timeout` for a free slot
    ///
    /// # Errors
    /// - `PoolExhausted` when no slot freed up in time
    /// - `PoolClosed` after [`ConnectionPool::close_all`]
    /// - the connector's error when a replacement connection cannot be opened
    pub async fn acquire(&self) -> Result<PooledConnection<C>, ContractError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(ContractError::PoolClosed);
        }

        let started = Instant::now();
        let permit = match tokio::time::timeout(
            inner.config.acquire_timeout,
            inner.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ContractError::PoolClosed),
            Err(_) => {
                inner.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("metrics_consumer_pool_acquire_timeouts_total").increment(1);
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(waited_ms, in_use = inner.in_use(), "connection pool exhausted");
                return Err(ContractError::PoolExhausted { waited_ms });
            }
        };

        let idle = inner.idle().pop();
        let conn = match idle {
            Some(conn) => conn,
            None => inner.open_connection().await?,
        };

        inner.metrics.acquired.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("metrics_consumer_pool_connections_in_use").set(inner.in_use() as f64);

        Ok(PooledConnection {
            conn: Some(conn),
            pool: inner.clone(),
            discard: false,
            _permit: permit,
        })
    }

    /// Close every idle connection and refuse further acquires; idempotent
    ///
    /// Connections still checked out are closed when they are released.
    #[instrument(name = "connection_pool_close_all", skip(self))]
    pub async fn close_all(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            debug!("connection pool already closed");
            return;
        }
        inner.permits.close();

        let idle: Vec<C::Connection> = std::mem::take(&mut *inner.idle());
        let count = idle.len();
        for mut conn in idle {
            if let Err(e) = conn.close().await {
                warn!(error = %e, "connection close failed");
            }
            inner.metrics.record_closed();
        }
        info!(closed = count, in_use = inner.in_use(), "connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Idle connections ready for reuse
    pub fn idle_count(&self) -> usize {
        self.inner.idle().len()
    }

    /// Connections currently checked out
    pub fn in_use(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.inner.in_use()
    }

    pub fn max_connections(&self) -> usize {
        self.inner.config.max_connections
    }

    pub fn connector_name(&self) -> &str {
        self.inner.connector.name()
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.inner.metrics
    }
}

/// A checked-out connection; returned to the pool on drop
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    pool: Arc<PoolInner<C>>,
    discard: bool,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConnection<C> {
    /// Close this connection on release instead of reusing it
    pub fn discard(&mut self) {
        self.discard = true;
    }

    /// Undo [`PooledConnection::discard`]: return the connection on release
    pub fn keep(&mut self) {
        self.discard = false;
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        // Only `Drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable!("connection already released"))
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("connection already released"))
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.discard);
        }
    }
}
