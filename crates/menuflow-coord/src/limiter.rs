//! Bounded concurrency limiter for outbound downloads.
//!
//! Built on tokio's fair semaphore: a released permit goes to the oldest
//! waiter first. Permits are RAII guards, so a permit can only be returned
//! once; the release path still checks the books in case that ever breaks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, trace, warn};

use crate::error::{Error, Result};

/// Counting limiter with FIFO hand-off.
#[derive(Debug, Clone)]
pub struct Limiter {
    inner: Arc<LimiterInner>,
}

#[derive(Debug)]
struct LimiterInner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_use: AtomicUsize,
    waiting: AtomicUsize,
    peak_in_use: AtomicUsize,
}

impl Limiter {
    /// Create a limiter with `capacity` permits.
    ///
    /// Capacity must be positive; zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            warn!("Limiter capacity of 0 requested, using 1");
            1
        } else {
            capacity
        };

        Self {
            inner: Arc::new(LimiterInner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                in_use: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
                peak_in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Maximum number of concurrent permits.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Wait for a permit.
    ///
    /// Waiters are served in arrival order. Dropping the returned future
    /// leaves the queue without consuming a permit.
    pub async fn acquire(&self) -> Result<Permit> {
        let _queued = WaitingGuard::enter(&self.inner.waiting);
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::InvariantViolation("limiter semaphore closed".to_string()))?;
        Ok(self.grant(permit))
    }

    /// Wait for a permit, giving up after `deadline`.
    pub async fn acquire_timeout(&self, deadline: Duration) -> Result<Permit> {
        match tokio::time::timeout(deadline, self.acquire()).await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    waited_ms = deadline.as_millis() as u64,
                    waiting = self.inner.waiting.load(Ordering::Relaxed),
                    "Gave up waiting for a download permit"
                );
                Err(Error::Timeout {
                    what: "download permit".to_string(),
                    after: deadline,
                })
            }
        }
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        Arc::clone(&self.inner.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| self.grant(permit))
    }

    /// Snapshot of the current accounting.
    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            capacity: self.inner.capacity,
            in_use: self.inner.in_use.load(Ordering::Acquire),
            waiting: self.inner.waiting.load(Ordering::Acquire),
            peak_in_use: self.inner.peak_in_use.load(Ordering::Acquire),
        }
    }

    fn grant(&self, permit: OwnedSemaphorePermit) -> Permit {
        let in_use = self.inner.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.peak_in_use.fetch_max(in_use, Ordering::AcqRel);
        if in_use > self.inner.capacity {
            debug_assert!(false, "limiter in_use {in_use} exceeds capacity");
            error!(
                in_use,
                capacity = self.inner.capacity,
                "Limiter granted more permits than its capacity"
            );
        }
        trace!(in_use, capacity = self.inner.capacity, "Permit granted");

        Permit {
            limiter: Arc::clone(&self.inner),
            _permit: permit,
        }
    }
}

impl LimiterInner {
    /// Book a release. Runs before the semaphore permit itself is returned,
    /// so `in_use` can lag the semaphore briefly but never exceed capacity.
    fn release(&self) {
        let released = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match released {
            Ok(prev) => trace!(in_use = prev - 1, "Permit released"),
            Err(_) => {
                debug_assert!(false, "limiter released more permits than were acquired");
                error!(
                    capacity = self.capacity,
                    "Limiter release without a matching acquire, clamping at 0"
                );
            }
        }
    }
}

/// A held limiter permit. Dropping it releases the permit to the next waiter.
#[derive(Debug)]
pub struct Permit {
    limiter: Arc<LimiterInner>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

/// Counts a caller as queued for as long as it is inside `acquire`.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Limiter statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterStats {
    /// Maximum concurrent permits.
    pub capacity: usize,

    /// Permits currently held.
    pub in_use: usize,

    /// Callers currently queued (or just granted and not yet returned).
    pub waiting: usize,

    /// Highest `in_use` observed.
    pub peak_in_use: usize,
}
