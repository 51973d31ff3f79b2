//! # dbpool-testing
//!
//! Test infrastructure for the `dbpool` connection pool.
//!
//! [`MockFactory`] stands in for a database driver. It counts every open,
//! close and validation, can be scripted to fail opens or report connections
//! as stale, and can slow opens down to expose lock contention.
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool::Pool;
//! use dbpool_testing::MockFactory;
//!
//! let pool = Pool::builder(MockFactory::new()).capacity(2).build()?;
//! let conn = pool.acquire()?;
//! assert_eq!(pool.factory().opens(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock;

pub use mock::{MockConnection, MockFactory};

