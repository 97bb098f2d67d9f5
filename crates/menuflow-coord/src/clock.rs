//! Time source used for cache freshness decisions.
//!
//! Timers (idle deadlines, download and acquire timeouts) run on tokio's
//! timer directly; only TTL bookkeeping goes through [`Clock`], so tests can
//! move it forward without sleeping.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Source of the current instant.
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

/// Clock backed by tokio's `Instant::now()`.
///
/// Follows tokio's paused time in tests that use `start_paused`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually driven clock.
///
/// All clones share the same current time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Instant) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Create a clock frozen at the current instant.
    pub fn starting_now() -> Self {
        Self::new(Instant::now())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.current.lock() += by;
    }

    /// Set the clock to a specific instant.
    pub fn set(&self, instant: Instant) {
        *self.current.lock() = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }
}
