//! Per-connection lifecycle states.

/// State of a connection identifier within a pool.
///
/// Identifiers move `Unborn -> Busy` on their first successful acquire,
/// then between `Busy` and `Idle` on release and reuse, and end in `Closed`
/// when the pool shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionState {
    /// No connection has been opened for this identifier.
    Unborn,
    /// Opened and available for reuse.
    Idle,
    /// Checked out by a caller, or being validated for one.
    Busy,
    /// The pool has shut down.
    Closed,
}

impl ConnectionState {
    /// Whether a live connection exists for the identifier.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Idle | Self::Busy)
    }
}
