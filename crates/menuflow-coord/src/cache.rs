//! Single-flight TTL cache in front of a shared upstream resource.
//!
//! A fresh entry is served from memory. Otherwise the first caller starts
//! the loader on its own task and every caller that shows up before it
//! finishes waits on the same outcome. The freshness check and the
//! in-flight registration happen under one lock, so two callers racing at
//! the TTL boundary can never both reach the upstream.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};

/// What to do when the loader fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fallback {
    /// Propagate the failure.
    #[default]
    Fail,
    /// Serve the last good entry, marked as stale, if one is young enough.
    Stale,
}

/// A value handed out by the cache.
///
/// Every variant owns its value; nothing a caller does to it reaches the
/// stored entry or another caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<V> {
    /// Served within its TTL, or just loaded.
    Fresh(V),
    /// The loader failed and the last good entry was served instead.
    Stale {
        /// The expired value.
        value: V,
        /// Time since that value was loaded.
        age: Duration,
        /// Why a fresh value could not be had.
        error: Error,
    },
}

impl<V> Fetched<V> {
    /// Borrow the value regardless of freshness.
    pub fn value(&self) -> &V {
        match self {
            Fetched::Fresh(value) | Fetched::Stale { value, .. } => value,
        }
    }

    /// Take the value regardless of freshness.
    pub fn into_value(self) -> V {
        match self {
            Fetched::Fresh(value) | Fetched::Stale { value, .. } => value,
        }
    }

    /// Whether the value is within its TTL.
    pub fn is_fresh(&self) -> bool {
        matches!(self, Fetched::Fresh(_))
    }
}

/// A stored snapshot.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Stored value.
    pub value: V,

    /// When the loader produced this value.
    pub fetched_at: Instant,
}

impl<V> CacheEntry<V> {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }

    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        self.age(now) < ttl
    }
}

type Outcome<V> = Option<Result<V>>;

struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    in_flight: HashMap<K, watch::Receiver<Outcome<V>>>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    loads: AtomicU64,
    failures: AtomicU64,
    stale_served: AtomicU64,
}

/// Single-flight cache with a fixed TTL.
///
/// Cheap to clone; clones share entries and in-flight fetches.
pub struct SingleFlightCache<K, V> {
    inner: Arc<Mutex<CacheInner<K, V>>>,
    counters: Arc<Counters>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_stale: Option<Duration>,
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache whose entries stay fresh for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
            })),
            counters: Arc::new(Counters::default()),
            clock: Arc::new(SystemClock::new()),
            ttl,
            max_stale: None,
        }
    }

    /// Read time from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Refuse to serve stale fallbacks older than `max_stale`.
    pub fn with_max_stale(mut self, max_stale: Option<Duration>) -> Self {
        self.max_stale = max_stale;
        self
    }

    /// The configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the fresh value for `key`, or load it exactly once.
    ///
    /// If a load for `key` is already running, this joins it instead of
    /// starting another. The loader runs on its own task, so dropping this
    /// future stops the wait but not the load.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: K,
        fallback: Fallback,
        loader: F,
    ) -> Result<Fetched<V>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let rx = {
            let mut inner = self.inner.lock();
            let now = self.clock.now();

            if let Some(entry) = inner.entries.get(&key)
                && entry.is_fresh(now, self.ttl)
            {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = ?key, age_ms = entry.age(now).as_millis() as u64, "Cache hit");
                return Ok(Fetched::Fresh(entry.value.clone()));
            }

            let running = inner.in_flight.get(&key).cloned();
            match running {
                Some(rx) => {
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    trace!(key = ?key, "Joining in-flight fetch");
                    rx
                }
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    inner.in_flight.insert(key.clone(), rx.clone());
                    self.spawn_load(key.clone(), tx, loader);
                    rx
                }
            }
        };

        match Self::wait(rx).await {
            Ok(value) => Ok(Fetched::Fresh(value)),
            Err(error) => self.fall_back(&key, fallback, error),
        }
    }

    /// Return the value for `key` only if it is fresh. Never loads.
    pub fn peek(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let now = self.clock.now();
        inner
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(now, self.ttl))
            .map(|entry| entry.value.clone())
    }

    /// Drop the stored entry for `key`. A running load is left alone.
    pub fn invalidate(&self, key: &K) -> bool {
        let removed = self.inner.lock().entries.remove(key).is_some();
        if removed {
            debug!(key = ?key, "Cache entry invalidated");
        }
        removed
    }

    /// Whether a load for `key` is running.
    pub fn is_loading(&self, key: &K) -> bool {
        self.inner.lock().in_flight.contains_key(key)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            in_flight: inner.in_flight.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            stale_served: self.counters.stale_served.load(Ordering::Relaxed),
        }
    }

    fn spawn_load<F, Fut>(&self, key: K, tx: watch::Sender<Outcome<V>>, loader: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let mut cleanup = FlightCleanup {
            inner: Arc::clone(&self.inner),
            key: Some(key),
        };
        let counters = Arc::clone(&self.counters);
        let clock = Arc::clone(&self.clock);

        tokio::spawn(async move {
            counters.loads.fetch_add(1, Ordering::Relaxed);
            let result = loader().await;

            let Some(key) = cleanup.key.take() else {
                return;
            };
            {
                let mut inner = cleanup.inner.lock();
                inner.in_flight.remove(&key);
                match &result {
                    Ok(value) => {
                        inner.entries.insert(
                            key.clone(),
                            CacheEntry {
                                value: value.clone(),
                                fetched_at: clock.now(),
                            },
                        );
                        debug!(key = ?key, "Cache entry refreshed");
                    }
                    Err(error) => {
                        counters.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(key = ?key, error = %error, "Cache load failed");
                    }
                }
            }

            // No receivers left just means nobody is waiting any more.
            let _ = tx.send(Some(result));
        });
    }

    async fn wait(mut rx: watch::Receiver<Outcome<V>>) -> Result<V> {
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(Error::UpstreamUnavailable(
                "fetch ended without a result".to_string(),
            ))
        })
    }

    fn fall_back(&self, key: &K, fallback: Fallback, error: Error) -> Result<Fetched<V>> {
        if fallback == Fallback::Fail {
            return Err(error);
        }

        let inner = self.inner.lock();
        let now = self.clock.now();
        let Some(entry) = inner.entries.get(key) else {
            return Err(error);
        };

        let age = entry.age(now);
        if let Some(max_stale) = self.max_stale
            && age > max_stale
        {
            debug!(key = ?key, age_ms = age.as_millis() as u64, "Last good entry too old to serve");
            return Err(error);
        }

        self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
        warn!(
            key = ?key,
            age_ms = age.as_millis() as u64,
            error = %error,
            "Serving stale entry after failed load"
        );
        Ok(Fetched::Stale {
            value: entry.value.clone(),
            age,
            error,
        })
    }
}

impl<K, V> Clone for SingleFlightCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            counters: Arc::clone(&self.counters),
            clock: Arc::clone(&self.clock),
            ttl: self.ttl,
            max_stale: self.max_stale,
        }
    }
}

/// Clears the in-flight slot if the load task dies before finishing.
struct FlightCleanup<K: Eq + Hash, V> {
    inner: Arc<Mutex<CacheInner<K, V>>>,
    key: Option<K>,
}

impl<K: Eq + Hash, V> Drop for FlightCleanup<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inner.lock().in_flight.remove(&key);
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Stored entries, fresh or not.
    pub entries: usize,

    /// Loads currently running.
    pub in_flight: usize,

    /// Calls served from a fresh entry.
    pub hits: u64,

    /// Calls that started a load.
    pub misses: u64,

    /// Calls that joined a running load.
    pub coalesced: u64,

    /// Loader invocations.
    pub loads: u64,

    /// Loader failures.
    pub failures: u64,

    /// Stale fallbacks served.
    pub stale_served: u64,
}
