//! Connection pool implementation.
//!
//! This module provides a bounded, blocking connection pool. Bookkeeping is
//! guarded by a single mutex per pool; opening and validating connections
//! always happens with that mutex released.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::PoolConfig;
use crate::error::{ConnectError, PoolError};
use crate::factory::{ConnectTarget, ConnectionFactory, ConnectionId};
use crate::lifecycle::ConnectionState;

/// A bounded pool of database connections.
///
/// The pool hands out at most `capacity` connections at a time. When every
/// connection is checked out, [`acquire`](Pool::acquire) blocks until one is
/// released or the configured wait budget runs out.
///
/// `Pool` is a cheap handle: clones share the same underlying pool. The pool
/// must be shut down explicitly with [`shutdown`](Pool::shutdown) to close
/// its connections.
///
/// # Example
///
/// ```rust,ignore
/// use dbpool::{Pool, PoolConfig};
///
/// let config = PoolConfig::from_json_file("data/config.json")?;
/// let pool = Pool::new(config, PgFactory::default())?;
///
/// let conn = pool.acquire()?;
/// conn.execute("UPDATE users SET active = true")?;
/// pool.release(conn);
///
/// pool.shutdown();
/// ```
pub struct Pool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

struct PoolInner<F: ConnectionFactory> {
    /// Pool configuration.
    config: PoolConfig,

    /// Connection target derived from the configuration.
    target: ConnectTarget,

    factory: F,

    /// Bookkeeping. Never held across factory I/O, except in shutdown.
    state: Mutex<PoolState<F::Connection>>,

    /// Signalled when a connection is released or a reservation is returned.
    available: Condvar,

    /// When the pool was created.
    created_at: Instant,

    /// Pool metrics.
    metrics: Mutex<PoolMetricsInner>,
}

struct PoolState<C> {
    /// Checked out, in checkout order.
    busy: VecDeque<ConnectionId>,
    /// Returned and reusable; the head is reused first.
    idle: VecDeque<ConnectionId>,
    /// Slots held by acquirers currently opening or validating outside the
    /// lock, mapped to whether the identifier was already born.
    reserved: HashMap<ConnectionId, bool>,
    /// Handles of every busy and idle identifier. `None` marks an identifier
    /// whose connection was lost and must be reopened on its next borrow.
    registry: HashMap<ConnectionId, Option<Arc<C>>>,
    /// Identifiers never handed out yet; the lowest is on top.
    unborn: Vec<ConnectionId>,
    closed: bool,
}

impl<C> PoolState<C> {
    fn new(capacity: u32) -> Self {
        Self {
            busy: VecDeque::new(),
            idle: VecDeque::new(),
            reserved: HashMap::new(),
            registry: HashMap::new(),
            unborn: (1..=capacity).rev().map(ConnectionId).collect(),
            closed: false,
        }
    }

    fn total(&self) -> usize {
        self.busy.len() + self.idle.len() + self.reserved.len()
    }
}

/// What an acquirer holds for its identifier while the lock is released.
enum Handle<C> {
    /// First open of the identifier.
    Unborn,
    /// Born, but its connection was closed after a failed reopen.
    Lost,
    /// A live connection to reuse, validated first if configured.
    Live(Arc<C>),
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    /// Total connections opened.
    connections_created: u64,
    /// Total connections closed.
    connections_closed: u64,
    /// Total failed open attempts.
    open_failures: u64,
    /// Total successful checkouts.
    checkouts_successful: u64,
    /// Total failed checkouts (exhaustion, open errors, closed pool).
    checkouts_failed: u64,
    /// Total validations performed.
    validations_performed: u64,
    /// Total validation failures.
    validations_failed: u64,
}

/// A slot reserved under the lock, to be filled outside it.
struct Checkout<C> {
    id: ConnectionId,
    handle: Handle<C>,
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a new pool builder around `factory`.
    #[must_use]
    pub fn builder(factory: F) -> PoolBuilder<F> {
        PoolBuilder::new(factory)
    }

    /// Create a new pool with the given configuration.
    ///
    /// No connection is opened until the first [`acquire`](Pool::acquire).
    pub fn new(config: PoolConfig, factory: F) -> Result<Self, PoolError> {
        config.validate()?;

        let target = config.target();
        let capacity = config.max_connections();
        tracing::info!(
            capacity = config.max_connections(),
            max_wait_ms = config.max_wait_time().as_millis() as u64,
            poll_interval_ms = config.poll_interval_time().as_millis() as u64,
            validate_on_borrow = config.validates_on_borrow(),
            host = %target.host,
            database = %target.database,
            "connection pool created"
        );

        let inner = Arc::new(PoolInner {
            config,
            target,
            factory,
            state: Mutex::new(PoolState::new(capacity)),
            available: Condvar::new(),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
        });

        Ok(Self { inner })
    }

    /// Get a connection from the pool.
    ///
    /// Reuses an idle connection if one exists, otherwise opens a new one if
    /// the pool is below capacity. At capacity, blocks for up to the
    /// configured maximum wait, re-checking every poll interval.
    ///
    /// # Errors
    ///
    /// - [`PoolError::PoolExhausted`] if no connection was freed in time.
    /// - [`PoolError::OpenError`] if the factory failed to open or validate.
    /// - [`PoolError::PoolClosed`] if the pool is, or becomes, shut down.
    pub fn acquire(&self) -> Result<PooledConnection<F>, PoolError> {
        tracing::trace!("acquiring connection from pool");

        let checkout = self
            .inner
            .reserve(self.inner.config.max_wait_time())
            .inspect_err(|err| {
                if let PoolError::PoolExhausted { waited } = err {
                    tracing::warn!(
                        capacity = self.inner.config.max_connections(),
                        waited_ms = waited.as_millis() as u64,
                        "connection pool exhausted"
                    );
                }
                self.inner.record(|m| m.checkouts_failed += 1);
            })?;

        self.inner.fill(checkout)
    }

    /// Try to get a connection without waiting.
    ///
    /// Returns `Ok(None)` if the pool is at capacity with nothing idle.
    /// Opening or validating a connection still happens synchronously.
    pub fn try_acquire(&self) -> Result<Option<PooledConnection<F>>, PoolError> {
        match self.inner.reserve(Duration::ZERO) {
            Ok(checkout) => self.inner.fill(checkout).map(Some),
            Err(PoolError::PoolExhausted { .. }) => Ok(None),
            Err(err) => {
                self.inner.record(|m| m.checkouts_failed += 1);
                Err(err)
            }
        }
    }

    /// Return a connection to the pool.
    ///
    /// The connection becomes idle and one blocked acquirer is woken.
    /// Connections that do not belong to this pool leave this pool
    /// untouched; they go back to their own pool as they are dropped.
    pub fn release(&self, conn: PooledConnection<F>) {
        if !Arc::ptr_eq(&conn.pool, &self.inner) {
            tracing::debug!(
                connection = %conn.id,
                "release of a connection owned by another pool ignored"
            );
        }
        drop(conn);
    }

    /// Acquire a connection, run `f` with it, and release it.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&F::Connection) -> T,
    ) -> Result<T, PoolError> {
        let conn = self.acquire()?;
        let output = f(&conn);
        self.release(conn);
        Ok(output)
    }

    /// Close every connection and refuse further acquisitions.
    ///
    /// Connections still checked out are closed as well; releasing them
    /// afterwards is a no-op. Calling this more than once has no effect.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        let busy = state.busy.len();
        let idle = state.idle.len();
        let mut closed = 0u64;
        for (id, conn) in state.registry.drain() {
            if let Some(conn) = conn {
                tracing::debug!(connection = %id, "closing connection");
                self.inner.factory.close(&conn);
                closed += 1;
            }
        }
        state.busy.clear();
        state.idle.clear();
        drop(state);

        self.inner.record(|m| m.connections_closed += closed);
        self.inner.available.notify_all();

        tracing::info!(busy, idle, "connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        let available = state.idle.len() as u32;
        let in_use = (state.busy.len() + state.reserved.len()) as u32;
        PoolStatus {
            available,
            in_use,
            total: available + in_use,
            max: self.inner.config.max_connections(),
        }
    }

    /// Get the lifecycle state of a connection identifier.
    #[must_use]
    pub fn connection_state(&self, id: ConnectionId) -> ConnectionState {
        let state = self.inner.state.lock();
        if state.closed {
            return ConnectionState::Closed;
        }
        if state.busy.contains(&id) {
            return ConnectionState::Busy;
        }
        if state.idle.contains(&id) {
            return ConnectionState::Idle;
        }
        match state.reserved.get(&id) {
            Some(true) => ConnectionState::Busy,
            _ => ConnectionState::Unborn,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            open_failures: inner.open_failures,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            validations_performed: inner.validations_performed,
            validations_failed: inner.validations_failed,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the connection factory.
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn record(&self, update: impl FnOnce(&mut PoolMetricsInner)) {
        update(&mut self.metrics.lock());
    }

    /// Phase one: pick an identifier and reserve its slot.
    ///
    /// Blocks for at most `max_wait` while the pool is full.
    fn reserve(&self, max_wait: Duration) -> Result<Checkout<F::Connection>, PoolError> {
        let capacity = self.config.max_connections() as usize;
        let poll_interval = self.config.poll_interval_time();

        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }

        let started = Instant::now();
        while state.idle.is_empty() && state.total() >= capacity {
            let waited = started.elapsed();
            if waited >= max_wait {
                return Err(PoolError::PoolExhausted { waited });
            }

            let _ = self
                .available
                .wait_for(&mut state, poll_interval.min(max_wait - waited));

            if state.closed {
                return Err(PoolError::PoolClosed);
            }
        }

        if let Some(id) = state.idle.pop_front() {
            // The in-flight acquirer owns the handle until it commits, so a
            // concurrent shutdown does not close it underneath the validation.
            let handle = match state.registry.remove(&id) {
                Some(Some(conn)) => Handle::Live(conn),
                Some(None) => Handle::Lost,
                None => Handle::Unborn,
            };
            state.reserved.insert(id, !matches!(handle, Handle::Unborn));
            tracing::trace!(connection = %id, "reusing idle connection");
            return Ok(Checkout { id, handle });
        }

        let Some(id) = state.unborn.pop() else {
            return Err(PoolError::PoolExhausted {
                waited: started.elapsed(),
            });
        };
        state.reserved.insert(id, false);
        tracing::trace!(connection = %id, "reserved slot for new connection");
        Ok(Checkout {
            id,
            handle: Handle::Unborn,
        })
    }

    /// Phases two and three: open or validate without the lock, then commit.
    fn fill(
        self: &Arc<Self>,
        checkout: Checkout<F::Connection>,
    ) -> Result<PooledConnection<F>, PoolError> {
        let Checkout { id, handle } = checkout;
        let result = self.materialize(id, handle);

        let mut state = self.state.lock();
        let born = state.reserved.remove(&id).unwrap_or(false);

        let conn = match result {
            Ok(conn) => conn,
            Err(err) => {
                if !state.closed {
                    if born {
                        // Identifiers are never retired; the next borrow reopens it.
                        state.registry.insert(id, None);
                        state.idle.push_back(id);
                    } else {
                        state.unborn.push(id);
                    }
                }
                drop(state);
                // The slot is free again; let a waiter take it.
                self.available.notify_one();
                self.record(|m| m.checkouts_failed += 1);
                tracing::warn!(connection = %id, error = %err, "failed to open connection");
                return Err(err.into());
            }
        };

        if state.closed {
            drop(state);
            self.factory.close(&conn);
            self.record(|m| {
                m.connections_closed += 1;
                m.checkouts_failed += 1;
            });
            tracing::debug!(connection = %id, "pool closed while connection was opening");
            return Err(PoolError::PoolClosed);
        }

        state.registry.insert(id, Some(Arc::clone(&conn)));
        state.busy.push_back(id);
        drop(state);

        self.record(|m| m.checkouts_successful += 1);
        tracing::trace!(connection = %id, "connection checked out");

        Ok(PooledConnection {
            id,
            conn,
            pool: Arc::clone(self),
        })
    }

    fn materialize(
        &self,
        id: ConnectionId,
        handle: Handle<F::Connection>,
    ) -> Result<Arc<F::Connection>, ConnectError> {
        let conn = match handle {
            Handle::Unborn => return self.open(id),
            Handle::Lost => {
                tracing::debug!(connection = %id, "reopening lost connection");
                return self.open(id);
            }
            Handle::Live(conn) => conn,
        };

        if !self.config.validates_on_borrow() {
            return Ok(conn);
        }

        let query = self.config.validation_query_text();
        tracing::debug!(connection = %id, query, "validating connection on borrow");
        self.record(|m| m.validations_performed += 1);

        match self.factory.validate(&conn, query) {
            Ok(()) => Ok(conn),
            Err(err) => {
                self.record(|m| {
                    m.validations_failed += 1;
                    m.connections_closed += 1;
                });
                tracing::warn!(
                    connection = %id,
                    error = %err,
                    "connection failed validation, reopening"
                );
                self.factory.close(&conn);
                self.open(id)
            }
        }
    }

    fn open(&self, id: ConnectionId) -> Result<Arc<F::Connection>, ConnectError> {
        tracing::debug!(
            connection = %id,
            driver = %self.target.driver,
            host = %self.target.host,
            port = ?self.target.port,
            "opening connection"
        );

        match self.factory.open(id, &self.target) {
            Ok(conn) => {
                self.record(|m| m.connections_created += 1);
                Ok(Arc::new(conn))
            }
            Err(err) => {
                self.record(|m| m.open_failures += 1);
                Err(err)
            }
        }
    }

    /// Move `id` from busy to idle. No-op for anything not checked out.
    fn release(&self, id: ConnectionId) {
        let mut state = self.state.lock();
        let Some(pos) = state.busy.iter().position(|b| *b == id) else {
            tracing::trace!(connection = %id, "ignoring release of connection not checked out");
            return;
        };
        state.busy.remove(pos);
        state.idle.push_back(id);
        drop(state);

        self.available.notify_one();
        tracing::trace!(connection = %id, "returned connection to pool");
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder(factory)
///     .capacity(10)
///     .max_wait(Duration::from_secs(2))
///     .build()?;
/// ```
pub struct PoolBuilder<F: ConnectionFactory> {
    factory: F,
    pool_config: PoolConfig,
}

impl<F: ConnectionFactory> PoolBuilder<F> {
    /// Create a new pool builder with default settings.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            pool_config: PoolConfig::default(),
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.pool_config = self.pool_config.capacity(capacity);
        self
    }

    /// Set the maximum time an acquisition blocks at capacity.
    #[must_use]
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.pool_config = self.pool_config.max_wait(max_wait);
        self
    }

    /// Set the granularity of the blocking wait.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.pool_config = self.pool_config.poll_interval(interval);
        self
    }

    /// Enable validation of reused connections with `query`.
    #[must_use]
    pub fn validate_on_borrow(mut self, query: impl Into<String>) -> Self {
        self.pool_config = self
            .pool_config
            .validate_on_borrow(true)
            .validation_query(query);
        self
    }

    /// Build the pool.
    pub fn build(self) -> Result<Pool<F>, PoolError> {
        Pool::new(self.pool_config, self.factory)
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections checked out or being prepared for checkout.
    pub in_use: u32,
    /// Total number of connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (f64::from(self.in_use) / f64::from(self.max)) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections opened since pool start.
    pub connections_created: u64,
    /// Total connections closed since pool start.
    pub connections_closed: u64,
    /// Open attempts the factory rejected.
    pub open_failures: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (exhaustion, open errors, pool closed).
    pub checkouts_failed: u64,
    /// Validations performed on borrow.
    pub validations_performed: u64,
    /// Validations that failed.
    pub validations_failed: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Calculate validation success rate (0.0 to 1.0).
    #[must_use]
    pub fn validation_success_rate(&self) -> f64 {
        if self.validations_performed == 0 {
            return 1.0;
        }
        let successful = self.validations_performed - self.validations_failed;
        successful as f64 / self.validations_performed as f64
    }
}

/// A connection retrieved from the pool.
///
/// Dereferences to the factory's connection type. Hand it back with
/// [`Pool::release`]; dropping it has the same effect.
pub struct PooledConnection<F: ConnectionFactory> {
    id: ConnectionId,
    conn: Arc<F::Connection>,
    pool: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// The connection's identifier within its pool.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<F: ConnectionFactory> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}
