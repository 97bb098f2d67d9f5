//! Per-session generation tokens for cooperative cancellation.
//!
//! Starting a generation for a session supersedes whatever that session was
//! doing before. The old operation is not killed; it notices at its next
//! checkpoint, or immediately if it is parked inside [`Generation::guard`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Tracks the current generation of every active session.
#[derive(Debug, Clone, Default)]
pub struct Generations {
    inner: Arc<GenerationsInner>,
}

#[derive(Debug, Default)]
struct GenerationsInner {
    current: Mutex<HashMap<String, Slot>>,
    /// Shared across sessions so a token is never handed out twice.
    next_token: AtomicU64,
}

#[derive(Debug)]
struct Slot {
    token: u64,
    cancel: CancellationToken,
}

impl Generations {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation for `session`, superseding the previous one.
    pub fn begin(&self, session: &str) -> Generation {
        let cancel = CancellationToken::new();

        // Issue and install under one lock so the installed token only grows.
        let mut current = self.inner.current.lock();
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = current.insert(
            session.to_string(),
            Slot {
                token,
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
            debug!(
                session = %session,
                superseded = previous.token,
                token,
                "Generation superseded"
            );
        } else {
            trace!(session = %session, token, "Generation started");
        }
        drop(current);

        Generation {
            session: session.to_string(),
            token,
            cancel,
        }
    }

    /// Whether `token` is still the current generation of `session`.
    pub fn is_current(&self, session: &str, token: u64) -> bool {
        self.inner
            .current
            .lock()
            .get(session)
            .is_some_and(|slot| slot.token == token)
    }

    /// The current token for `session`, if it has one.
    pub fn current(&self, session: &str) -> Option<u64> {
        self.inner.current.lock().get(session).map(|slot| slot.token)
    }

    /// Forget `session`, cancelling its current generation.
    ///
    /// Idempotent: returns `false` if there was nothing to end.
    pub fn end(&self, session: &str) -> bool {
        let removed = self.inner.current.lock().remove(session);
        match removed {
            Some(slot) => {
                slot.cancel.cancel();
                debug!(session = %session, token = slot.token, "Generation ended");
                true
            }
            None => false,
        }
    }

    /// Number of sessions with a current generation.
    pub fn len(&self) -> usize {
        self.inner.current.lock().len()
    }

    /// Check if no session has a current generation.
    pub fn is_empty(&self) -> bool {
        self.inner.current.lock().is_empty()
    }
}

/// Handle held by one cancelable operation.
#[derive(Debug, Clone)]
pub struct Generation {
    session: String,
    token: u64,
    cancel: CancellationToken,
}

impl Generation {
    /// Session this operation belongs to.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Token identifying this operation.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Whether this is still the session's current operation.
    pub fn is_current(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Checkpoint before externally visible work.
    ///
    /// Returns [`Error::Superseded`] once a newer generation has started
    /// or the session has ended.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            trace!(
                session = %self.session,
                token = self.token,
                "Checkpoint hit after supersession"
            );
            Err(self.superseded())
        }
    }

    /// Run `fut` unless this operation is superseded first.
    ///
    /// If supersession wins, `fut` is dropped, which releases whatever it
    /// was waiting on (a limiter slot, an in-flight cache wait).
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.checkpoint()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.superseded()),
            result = fut => result,
        }
    }

    fn superseded(&self) -> Error {
        Error::Superseded {
            session: self.session.clone(),
        }
    }
}
