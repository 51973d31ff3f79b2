//! # dbpool
//!
//! Bounded, blocking database connection pool.
//!
//! The pool opens connections lazily through a [`ConnectionFactory`], never
//! holds more than its configured capacity, and makes callers wait (up to a
//! configured budget) when every connection is checked out.
//!
//! ## Features
//!
//! - Reuse of returned connections before opening new ones
//! - Optional validation of reused connections, with in-place reopen
//! - Bounded blocking wait driven by a condition variable
//! - Connection open and validation performed outside the pool lock
//! - Explicit, idempotent shutdown
//! - Status and metrics for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool::{Pool, PoolConfig};
//! use std::time::Duration;
//!
//! // Using the builder pattern
//! let pool = Pool::builder(factory)
//!     .capacity(5)
//!     .max_wait(Duration::from_secs(5))
//!     .validate_on_borrow("SELECT 1")
//!     .build()?;
//!
//! // Or from a configuration file
//! let config = PoolConfig::from_json_file("data/config.json")?;
//! let pool = Pool::new(config, factory)?;
//!
//! // Get a connection from the pool
//! let conn = pool.acquire()?;
//! // Use connection...
//! pool.release(conn);
//!
//! // Check pool status
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//!
//! // Close every connection before the process exits
//! pool.shutdown();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod factory;
pub mod lifecycle;
pub mod pool;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::{ConnectError, PoolError};

// Driver seam
pub use factory::{ConnectTarget, ConnectionFactory, ConnectionId};

// Pool types
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection};

// Lifecycle management
pub use lifecycle::ConnectionState;
