//! Configuration for the coordinator.

use std::path::PathBuf;
use std::time::Duration;

/// Default freshness window for the shared catalog.
pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(6);

/// Default deadline for one catalog load.
pub const DEFAULT_CATALOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of concurrent asset downloads.
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 3;

/// Default deadline for one asset download.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Default deadline for waiting on a download permit.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle deadline for a session.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default directory for downloaded assets.
pub const DEFAULT_ASSET_DIR: &str = ".tmp_images";

/// Configuration for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a loaded catalog is served without asking upstream again.
    /// Also the maximum age of a reusable downloaded asset.
    pub catalog_ttl: Duration,

    /// Deadline for a single catalog load.
    pub catalog_timeout: Duration,

    /// Oldest catalog that may be served as a stale fallback.
    /// `None` serves any last good copy.
    pub max_stale: Option<Duration>,

    /// Maximum concurrent asset downloads.
    pub download_concurrency: usize,

    /// Deadline for a single asset download.
    pub download_timeout: Duration,

    /// Deadline for waiting on a download permit.
    pub acquire_timeout: Duration,

    /// Idle deadline applied by `touch_session`.
    pub idle_timeout: Duration,

    /// Where downloaded assets are stored.
    pub asset_dir: PathBuf,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            catalog_ttl: DEFAULT_CATALOG_TTL,
            catalog_timeout: DEFAULT_CATALOG_TIMEOUT,
            max_stale: None,
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            asset_dir: PathBuf::from(DEFAULT_ASSET_DIR),
        }
    }
}

impl CoordinatorConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the catalog TTL.
    pub fn with_catalog_ttl(mut self, ttl: Duration) -> Self {
        self.catalog_ttl = ttl;
        self
    }

    /// Set the catalog load deadline.
    pub fn with_catalog_timeout(mut self, timeout: Duration) -> Self {
        self.catalog_timeout = timeout;
        self
    }

    /// Bound the age of stale fallbacks.
    pub fn with_max_stale(mut self, max_stale: Option<Duration>) -> Self {
        self.max_stale = max_stale;
        self
    }

    /// Set the number of concurrent downloads.
    pub fn with_download_concurrency(mut self, permits: usize) -> Self {
        self.download_concurrency = permits;
        self
    }

    /// Set the per-download deadline.
    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    /// Set the permit wait deadline.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the default idle deadline.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the asset directory.
    pub fn with_asset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.asset_dir = dir.into();
        self
    }
}
