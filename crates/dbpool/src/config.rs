//! Pool configuration.
//!
//! A [`PoolConfig`] is read once when the pool is built and never changes
//! afterwards. It can be assembled with the builder-style setters or loaded
//! from the `database` section of a JSON configuration document:
//!
//! ```json
//! {
//!   "database": {
//!     "type": "postgres",
//!     "host": "127.0.0.1",
//!     "database_name": "app",
//!     "username": "app",
//!     "password": "secret",
//!     "port": 0,
//!     "test_on_borrow": true,
//!     "test_on_borrow_sql": "SELECT 1",
//!     "max_wait_time": 5000,
//!     "wait_interval_time": 200,
//!     "max_connection_count": 5
//!   }
//! }
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;
use crate::factory::ConnectTarget;

/// Default validation query.
pub const DEFAULT_VALIDATION_QUERY: &str = "SELECT 1";

/// Key of the section holding pool settings in a configuration document.
const DATABASE_SECTION: &str = "database";

/// Configuration for a connection pool.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Driver identifier handed to the factory.
    #[serde(rename = "type")]
    driver: String,
    host: String,
    database_name: String,
    username: String,
    #[serde(skip_serializing)]
    password: String,
    /// 0 means "use the driver default".
    port: u16,
    #[serde(rename = "test_on_borrow")]
    validate_on_borrow: bool,
    #[serde(rename = "test_on_borrow_sql")]
    validation_query: String,
    #[serde(rename = "max_wait_time")]
    max_wait_ms: u64,
    #[serde(rename = "wait_interval_time")]
    poll_interval_ms: u64,
    #[serde(rename = "max_connection_count")]
    capacity: u32,
}

impl Default for PoolConfig {
    /// Defaults:
    /// - capacity: 5
    /// - max wait: 5 seconds, polled every 200ms
    /// - validate on borrow: off, with `SELECT 1` as the probe
    /// - port: driver default
    fn default() -> Self {
        Self {
            driver: String::new(),
            host: String::new(),
            database_name: String::new(),
            username: String::new(),
            password: String::new(),
            port: 0,
            validate_on_borrow: false,
            validation_query: DEFAULT_VALIDATION_QUERY.to_string(),
            max_wait_ms: 5_000,
            poll_interval_ms: 200,
            capacity: 5,
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("database_name", &self.database_name)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("port", &self.port)
            .field("validate_on_borrow", &self.validate_on_borrow)
            .field("validation_query", &self.validation_query)
            .field("max_wait_ms", &self.max_wait_ms)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `database` section of a JSON document.
    ///
    /// Keys missing from the section keep their defaults. Unknown keys
    /// (such as `sql_files`) are ignored.
    pub fn from_json_str(json: &str) -> Result<Self, PoolError> {
        let mut document: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| PoolError::Config(format!("malformed configuration: {e}")))?;

        let section = document
            .get_mut(DATABASE_SECTION)
            .map(serde_json::Value::take)
            .ok_or_else(|| {
                PoolError::Config(format!("missing \"{DATABASE_SECTION}\" section"))
            })?;

        let config: Self = serde_json::from_value(section).map_err(|e| {
            PoolError::Config(format!("invalid \"{DATABASE_SECTION}\" section: {e}"))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PoolError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PoolError::Config(format!("cannot read {}: {e}", path.display())))?;

        tracing::debug!(path = %path.display(), "loading pool configuration");
        Self::from_json_str(&contents)
    }

    /// Check that the configuration can drive a pool.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.capacity == 0 {
            return Err(PoolError::Config(
                "max_connection_count must be greater than 0".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(PoolError::Config(
                "wait_interval_time must be greater than 0".into(),
            ));
        }
        if self.validate_on_borrow && self.validation_query.trim().is_empty() {
            return Err(PoolError::Config(
                "test_on_borrow is enabled but test_on_borrow_sql is empty".into(),
            ));
        }
        Ok(())
    }

    /// Set the driver identifier.
    #[must_use]
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }

    /// Set the login credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the server port. 0 selects the driver default.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable validation of reused connections.
    #[must_use]
    pub fn validate_on_borrow(mut self, enabled: bool) -> Self {
        self.validate_on_borrow = enabled;
        self
    }

    /// Set the query used to validate a reused connection.
    #[must_use]
    pub fn validation_query(mut self, query: impl Into<String>) -> Self {
        self.validation_query = query.into();
        self
    }

    /// Set the maximum time `acquire` blocks at capacity.
    #[must_use]
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait_ms = duration_to_millis(max_wait);
        self
    }

    /// Set the granularity of the blocking wait.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_to_millis(interval);
        self
    }

    /// Set the maximum number of simultaneous connections.
    #[must_use]
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Maximum number of simultaneous connections.
    #[must_use]
    pub fn max_connections(&self) -> u32 {
        self.capacity
    }

    /// Maximum time `acquire` blocks at capacity.
    #[must_use]
    pub fn max_wait_time(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Granularity of the blocking wait.
    #[must_use]
    pub fn poll_interval_time(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Whether reused connections are validated before being handed out.
    #[must_use]
    pub fn validates_on_borrow(&self) -> bool {
        self.validate_on_borrow
    }

    /// The validation query text.
    #[must_use]
    pub fn validation_query_text(&self) -> &str {
        &self.validation_query
    }

    /// Connection target handed to the factory.
    #[must_use]
    pub fn target(&self) -> ConnectTarget {
        ConnectTarget {
            driver: self.driver.clone(),
            host: self.host.clone(),
            database: self.database_name.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            port: (self.port != 0).then_some(self.port),
        }
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
