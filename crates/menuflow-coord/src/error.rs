//! Error types for coordination operations.

use std::time::Duration;

/// Error type for coordination operations.
///
/// `Clone` because one in-flight fetch failure is delivered to every caller
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The catalog loader or asset fetcher failed.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A deadline elapsed while waiting on a suspension point.
    #[error("Timed out waiting for {what} after {after:?}")]
    Timeout {
        /// What was being waited on (e.g. "download permit").
        what: String,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The operation was replaced by a newer one for the same session.
    ///
    /// Not a failure: the caller should stop quietly.
    #[error("Operation superseded for session {session}")]
    Superseded {
        /// Session whose generation moved on.
        session: String,
    },

    /// Internal accounting went wrong (permit over-release, double fire).
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Writing a downloaded asset to its target location failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An asset reference could not be turned into a fetchable URL.
    #[error("Invalid asset reference: {0}")]
    InvalidAsset(String),

    /// Invalid configuration (bad base URL, unusable path).
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build an upstream error from anything displayable.
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Self::UpstreamUnavailable(err.to_string())
    }

    /// Check if this is a supersession signal rather than a real failure.
    pub fn is_superseded(&self) -> bool {
        matches!(self, Error::Superseded { .. })
    }

    /// Check if the caller should treat this as "upstream unavailable, try again".
    pub fn is_upstream_unavailable(&self) -> bool {
        matches!(self, Error::UpstreamUnavailable(_) | Error::Timeout { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Result type for coordination operations.
pub type Result<T> = std::result::Result<T, Error>;
