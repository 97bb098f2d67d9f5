//! Per-session idle deadlines.
//!
//! Each session has at most one armed timer. `touch` replaces it, `stop`
//! disarms it. A timer only fires after claiming its slot under the
//! supervisor lock, and `touch`/`stop` only disarm timers still holding a
//! slot, so a timer either fires or is cancelled, never both.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Default number of terminal-state records kept for [`IdleSupervisor::state`].
pub const DEFAULT_FINISHED_CAPACITY: usize = 10_000;

/// Where a session stands with the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// A deadline is armed.
    Active,
    /// The deadline passed and the expiry action ran.
    Expired,
    /// The timer was stopped before it fired.
    Closed,
}

struct Timer {
    id: u64,
    deadline: Instant,
    handle: JoinHandle<()>,
}

struct SupervisorInner {
    timers: HashMap<String, Timer>,
    finished: LruCache<String, SessionState>,
    next_id: u64,
}

impl SupervisorInner {
    /// Take the slot for `session` if timer `id` still owns it.
    fn claim(&mut self, session: &str, id: u64) -> bool {
        if self.timers.get(session).is_some_and(|timer| timer.id == id) {
            self.timers.remove(session);
            self.finished.put(session.to_string(), SessionState::Expired);
            true
        } else {
            false
        }
    }
}

/// Arms, resets and disarms idle deadlines for sessions.
///
/// Must be used from within a tokio runtime; timers are tokio tasks.
#[derive(Clone)]
pub struct IdleSupervisor {
    inner: Arc<Mutex<SupervisorInner>>,
}

impl IdleSupervisor {
    /// Create a supervisor with the default terminal-state history.
    pub fn new() -> Self {
        Self::with_history(DEFAULT_FINISHED_CAPACITY)
    }

    /// Create a supervisor remembering the terminal state of up to
    /// `capacity` sessions.
    pub fn with_history(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(SupervisorInner {
                timers: HashMap::new(),
                finished: LruCache::new(capacity),
                next_id: 0,
            })),
        }
    }

    /// Arm a fresh deadline for `session`, replacing any existing one.
    ///
    /// `on_expire` runs at most once, after `timeout` elapses with no further
    /// `touch` or `stop` for this session. It is called while the timer's
    /// claim is still held, so no `touch` can interleave with its synchronous
    /// part; it must not call back into the supervisor. The future it returns
    /// runs after the claim is released.
    pub fn touch<F, Fut>(&self, session: &str, timeout: Duration, on_expire: F)
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        let deadline = Instant::now() + timeout;

        let supervisor = Arc::clone(&self.inner);
        let key = session.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let expired = {
                let mut inner = supervisor.lock();
                if !inner.claim(&key, id) {
                    return;
                }
                on_expire(key.clone())
            };
            info!(session = %key, "Session idle timeout reached");
            expired.await;
        });

        let replaced = inner.timers.insert(
            session.to_string(),
            Timer {
                id,
                deadline,
                handle,
            },
        );
        inner.finished.pop(session);
        drop(inner);

        match replaced {
            Some(old) => {
                old.handle.abort();
                trace!(
                    session = %session,
                    timeout_ms = timeout.as_millis() as u64,
                    "Idle timer reset"
                );
            }
            None => {
                debug!(
                    session = %session,
                    timeout_ms = timeout.as_millis() as u64,
                    "Idle timer started"
                );
            }
        }
    }

    /// Disarm the deadline for `session` without running its expiry action.
    ///
    /// Returns `false` if no timer was armed (never started, already
    /// stopped, or already fired).
    pub fn stop(&self, session: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.timers.remove(session);
        if removed.is_some() {
            inner.finished.put(session.to_string(), SessionState::Closed);
        }
        drop(inner);

        match removed {
            Some(timer) => {
                timer.handle.abort();
                debug!(session = %session, "Idle timer stopped");
                true
            }
            None => false,
        }
    }

    /// Current state of `session`, if the supervisor knows it.
    pub fn state(&self, session: &str) -> Option<SessionState> {
        let inner = self.inner.lock();
        if inner.timers.contains_key(session) {
            Some(SessionState::Active)
        } else {
            inner.finished.peek(session).copied()
        }
    }

    /// Time left before `session` expires.
    pub fn remaining(&self, session: &str) -> Option<Duration> {
        let inner = self.inner.lock();
        inner
            .timers
            .get(session)
            .map(|timer| timer.deadline.saturating_duration_since(Instant::now()))
    }

    /// Number of sessions with an armed deadline.
    pub fn active_count(&self) -> usize {
        self.inner.lock().timers.len()
    }

    /// Disarm every deadline without firing any of them.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<(String, Timer)> = self.inner.lock().timers.drain().collect();
        let count = drained.len();
        for (_, timer) in drained {
            timer.handle.abort();
        }
        if count > 0 {
            debug!(count, "Idle timers cancelled on shutdown");
        }
        count
    }
}

impl Default for IdleSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
