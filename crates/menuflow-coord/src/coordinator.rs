//! The facade the conversation engine talks to.
//!
//! One `Coordinator` is built at startup and shared by every session. The
//! limiter and catalog cache inside it are the only cross-session state;
//! idle timers and generations are keyed per session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::assets::{AssetFetcher, AssetRef, AssetStore};
use crate::cache::{CacheStats, Fallback, Fetched, SingleFlightCache};
use crate::catalog::{Catalog, CatalogFallback, CatalogItem, CatalogLoader, Freshness};
use crate::clock::Clock;
use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::generation::{Generation, Generations};
use crate::idle::{IdleSupervisor, SessionState};
use crate::limiter::{Limiter, LimiterStats};

/// Cache key of the shared catalog.
const CATALOG_KEY: &str = "catalog";

/// Moves a session's visible state to its idle terminal step.
#[async_trait]
pub trait ExpiryHandler: Send + Sync {
    /// Called once when `session` has been idle past its deadline.
    async fn on_expire(&self, session: &str);
}

/// Expiry handler that only logs.
#[derive(Debug, Clone, Default)]
pub struct LogExpiry;

#[async_trait]
impl ExpiryHandler for LogExpiry {
    async fn on_expire(&self, session: &str) {
        info!(session = %session, "Session expired");
    }
}

/// Time, concurrency and shared-resource coordination for all sessions.
#[derive(Clone)]
pub struct Coordinator {
    config: Arc<CoordinatorConfig>,
    limiter: Limiter,
    catalog: SingleFlightCache<&'static str, Vec<CatalogItem>>,
    idle: IdleSupervisor,
    generations: Generations,
    assets: AssetStore,
    loader: Arc<dyn CatalogLoader>,
    fetcher: Arc<dyn AssetFetcher>,
    expiry: Arc<dyn ExpiryHandler>,
}

impl Coordinator {
    /// Create a coordinator over the given upstream ports.
    pub fn new(
        config: CoordinatorConfig,
        loader: Arc<dyn CatalogLoader>,
        fetcher: Arc<dyn AssetFetcher>,
    ) -> Self {
        let catalog =
            SingleFlightCache::new(config.catalog_ttl).with_max_stale(config.max_stale);
        Self {
            limiter: Limiter::new(config.download_concurrency),
            catalog,
            idle: IdleSupervisor::new(),
            generations: Generations::new(),
            assets: AssetStore::new(config.asset_dir.clone(), config.catalog_ttl),
            loader,
            fetcher,
            expiry: Arc::new(LogExpiry),
            config: Arc::new(config),
        }
    }

    /// Invoke `handler` when a session goes idle.
    pub fn with_expiry_handler(mut self, handler: Arc<dyn ExpiryHandler>) -> Self {
        self.expiry = handler;
        self
    }

    /// Read catalog freshness from `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.catalog = self.catalog.with_clock(clock);
        self
    }

    /// The configuration in effect.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    /// Reset the idle deadline of `session` to the configured timeout.
    ///
    /// Call on every inbound event from the session.
    pub fn touch_session(&self, session: &str) {
        self.touch_session_for(session, self.config.idle_timeout);
    }

    /// Reset the idle deadline of `session` to `timeout`.
    pub fn touch_session_for(&self, session: &str, timeout: Duration) {
        let generations = self.generations.clone();
        let expiry = Arc::clone(&self.expiry);
        self.idle.touch(session, timeout, move |key| {
            // Ended under the timer's claim, so it is never a newer touch's operation.
            generations.end(&key);
            async move { expiry.on_expire(&key).await }
        });
    }

    /// Close `session` after a natural terminal step.
    ///
    /// Cancels the idle deadline and the current operation. Safe to call
    /// more than once and safe to race with expiry.
    pub fn end_session(&self, session: &str) -> bool {
        let stopped = self.idle.stop(session);
        let ended = self.generations.end(session);
        if stopped || ended {
            debug!(session = %session, "Session ended");
        }
        stopped || ended
    }

    /// Idle state of `session`, if known.
    pub fn session_state(&self, session: &str) -> Option<SessionState> {
        self.idle.state(session)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cancelable operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a long operation for `session`, superseding any earlier one.
    pub fn begin_cancelable_operation(&self, session: &str) -> Generation {
        self.generations.begin(session)
    }

    /// Whether `token` is still the current operation of `session`.
    pub fn is_current(&self, session: &str, token: u64) -> bool {
        self.generations.is_current(session, token)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shared resources
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the shared catalog, loading it at most once per TTL window.
    pub async fn fetch_catalog(&self, fallback: CatalogFallback) -> Result<Catalog> {
        let loader = Arc::clone(&self.loader);
        let timeout = self.config.catalog_timeout;
        let policy = match fallback {
            CatalogFallback::LastGood => Fallback::Stale,
            CatalogFallback::Fail | CatalogFallback::Empty => Fallback::Fail,
        };

        let fetched = self
            .catalog
            .get_or_fetch(CATALOG_KEY, policy, move || async move {
                match tokio::time::timeout(timeout, loader.load()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout {
                        what: "catalog".to_string(),
                        after: timeout,
                    }),
                }
            })
            .await;

        match fetched {
            Ok(Fetched::Fresh(items)) => Ok(Catalog {
                items,
                freshness: Freshness::Fresh,
            }),
            Ok(Fetched::Stale { value, age, .. }) => Ok(Catalog {
                items: value,
                freshness: Freshness::Stale { age },
            }),
            Err(e) if fallback == CatalogFallback::Empty && e.is_upstream_unavailable() => {
                warn!(error = %e, "Catalog unavailable, serving empty catalog");
                Ok(Catalog::empty())
            }
            Err(e) => Err(e),
        }
    }

    /// Download `asset` into the asset directory, bounded by the limiter.
    ///
    /// A local copy younger than the catalog TTL is reused without taking
    /// a permit.
    pub async fn download_asset(&self, asset: &AssetRef) -> Result<PathBuf> {
        let target = self.assets.target(asset)?;
        if let Some(path) = self.assets.fresh_copy(asset).await {
            return Ok(path);
        }

        let _permit = self.limiter.acquire_timeout(self.config.acquire_timeout).await?;

        // Someone else may have stored it while we queued.
        if let Some(path) = self.assets.fresh_copy(asset).await {
            return Ok(path);
        }

        self.assets.ensure_dir().await?;
        let timeout = self.config.download_timeout;
        match tokio::time::timeout(timeout, self.fetcher.fetch(asset, &target, timeout)).await {
            Ok(Ok(())) => Ok(target),
            Ok(Err(e)) => {
                warn!(url = %asset.url, error = %e, "Asset download failed");
                Err(e)
            }
            Err(_) => {
                warn!(
                    url = %asset.url,
                    timeout_ms = timeout.as_millis() as u64,
                    "Asset download timed out"
                );
                Err(Error::Timeout {
                    what: asset.url.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// Download `asset` on behalf of `operation`.
    ///
    /// Fails with [`Error::Superseded`] instead of downloading, or as soon as
    /// the operation is superseded while queued for a permit.
    pub async fn download_for(&self, operation: &Generation, asset: &AssetRef) -> Result<PathBuf> {
        operation.guard(self.download_asset(asset)).await
    }

    /// Delete downloaded assets older than the catalog TTL.
    ///
    /// Safe to call while other sessions are downloading: a file young enough
    /// to be handed out by [`download_asset`](Self::download_asset) is kept.
    pub async fn purge_assets(&self) -> Result<usize> {
        self.assets.purge_expired().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────────

    /// Snapshot of coordinator state.
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            limiter: self.limiter.stats(),
            catalog: self.catalog.stats(),
            active_sessions: self.idle.active_count(),
            operations: self.generations.len(),
        }
    }

    /// Disarm every idle deadline. Running operations are left to finish.
    pub fn shutdown(&self) {
        let cancelled = self.idle.shutdown();
        info!(cancelled, "Coordinator shut down");
    }
}

/// Coordinator statistics.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorStats {
    /// Download limiter accounting.
    pub limiter: LimiterStats,

    /// Catalog cache counters.
    pub catalog: CacheStats,

    /// Sessions with an armed idle deadline.
    pub active_sessions: usize,

    /// Sessions with a current cancelable operation.
    pub operations: usize,
}
