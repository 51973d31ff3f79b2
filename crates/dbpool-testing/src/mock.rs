//! Mock connection factory.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use dbpool::{ConnectError, ConnectTarget, ConnectionFactory, ConnectionId};
use parking_lot::Mutex;

/// A fake physical connection.
#[derive(Debug)]
pub struct MockConnection {
    id: ConnectionId,
    serial: u64,
    closed: AtomicBool,
    claimed: AtomicBool,
}

impl MockConnection {
    /// Pool identifier the connection was opened for.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Unique number of this physical connection, in open order from 1.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Whether the factory has closed this connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark the connection as used by the caller.
    ///
    /// Returns `false` if another caller already holds the claim, which
    /// means the pool handed the same connection out twice.
    pub fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }

    /// Drop the caller's claim.
    pub fn unclaim(&self) {
        self.claimed.store(false, Ordering::SeqCst);
    }
}

/// Scriptable [`ConnectionFactory`] with call counters.
#[derive(Debug, Default)]
pub struct MockFactory {
    open_attempts: AtomicU32,
    opens: AtomicU32,
    closes: AtomicU32,
    validations: AtomicU32,
    next_serial: AtomicU64,
    /// Number of upcoming opens to reject.
    failing_opens: AtomicU32,
    /// Serials whose validation fails.
    stale: Mutex<HashSet<u64>>,
    open_delay: Mutex<Duration>,
    opening_now: AtomicU32,
    max_concurrent_opens: AtomicU32,
    live: AtomicU32,
    max_live: AtomicU32,
    last_target: Mutex<Option<ConnectTarget>>,
}

impl MockFactory {
    /// Create a factory whose opens and validations all succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every open take at least `delay`.
    #[must_use]
    pub fn with_open_delay(self, delay: Duration) -> Self {
        *self.open_delay.lock() = delay;
        self
    }

    /// Reject the next `count` open attempts.
    pub fn fail_next_opens(&self, count: u32) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Make validation of the connection with `serial` fail.
    pub fn mark_stale(&self, serial: u64) {
        self.stale.lock().insert(serial);
    }

    /// Number of open calls, successful or not.
    #[must_use]
    pub fn open_attempts(&self) -> u32 {
        self.open_attempts.load(Ordering::SeqCst)
    }

    /// Number of successful opens.
    #[must_use]
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of close calls.
    #[must_use]
    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Number of validation calls.
    #[must_use]
    pub fn validations(&self) -> u32 {
        self.validations.load(Ordering::SeqCst)
    }

    /// Highest number of opens that ran at the same time.
    #[must_use]
    pub fn max_concurrent_opens(&self) -> u32 {
        self.max_concurrent_opens.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed.
    #[must_use]
    pub fn live(&self) -> u32 {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of connections that were open at the same time.
    #[must_use]
    pub fn max_live(&self) -> u32 {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Target passed to the most recent open.
    #[must_use]
    pub fn last_target(&self) -> Option<ConnectTarget> {
        self.last_target.lock().clone()
    }

    fn take_failure(&self) -> bool {
        self.failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    fn open(
        &self,
        id: ConnectionId,
        target: &ConnectTarget,
    ) -> Result<MockConnection, ConnectError> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        *self.last_target.lock() = Some(target.clone());

        let opening = self.opening_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_opens.fetch_max(opening, Ordering::SeqCst);

        let delay = *self.open_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.opening_now.fetch_sub(1, Ordering::SeqCst);

        if self.take_failure() {
            tracing::trace!(connection = %id, "mock open rejected");
            return Err(ConnectError::new(format!(
                "could not connect to {}:{}",
                target.host,
                target.port.unwrap_or_default()
            )));
        }

        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst) + 1;
        self.opens.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);

        tracing::trace!(connection = %id, serial, "mock connection opened");
        Ok(MockConnection {
            id,
            serial,
            closed: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
        })
    }

    fn validate(&self, conn: &MockConnection, query: &str) -> Result<(), ConnectError> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        if conn.is_closed() || self.stale.lock().contains(&conn.serial) {
            return Err(ConnectError::new(format!(
                "{query} failed: server closed the connection unexpectedly"
            )));
        }
        Ok(())
    }

    fn close(&self, conn: &MockConnection) {
        if !conn.closed.swap(true, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
