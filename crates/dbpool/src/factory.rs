//! The seam between the pool and the database driver.

use std::fmt;

use crate::error::ConnectError;

/// Identifier of a pooled connection.
///
/// Identifiers are numbered from 1 up to the pool capacity and are reused
/// for the lifetime of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u32);

impl ConnectionId {
    /// Create an identifier from its number.
    #[must_use]
    pub fn new(number: u32) -> Self {
        Self(number)
    }

    /// The identifier's number.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection-{}", self.0)
    }
}

/// Where and how the factory should connect.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Driver identifier, e.g. `postgres` or `sqlite`.
    pub driver: String,
    /// Server hostname or IP address.
    pub host: String,
    /// Database name.
    pub database: String,
    /// Login name.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Server port, `None` for the driver default.
    pub port: Option<u16>,
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("port", &self.port)
            .finish()
    }
}

/// Opens, validates and closes physical connections on behalf of a pool.
///
/// All methods are called without the pool lock held, except
/// [`close`](ConnectionFactory::close) during shutdown. Implementations must
/// be safe to call from several threads at once.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The physical connection type.
    type Connection: Send + Sync + 'static;

    /// Open a new connection for `id`.
    fn open(&self, id: ConnectionId, target: &ConnectTarget)
    -> Result<Self::Connection, ConnectError>;

    /// Run `query` on `conn` to check it is still usable.
    ///
    /// Default implementation accepts every connection.
    fn validate(&self, conn: &Self::Connection, query: &str) -> Result<(), ConnectError> {
        let _ = (conn, query);
        Ok(())
    }

    /// Close a connection. Errors are the factory's to log.
    fn close(&self, conn: &Self::Connection);
}
