//! Time, concurrency and shared-resource coordination for ordering sessions.
//!
//! Many customer conversations run at once against one slow upstream. This
//! crate keeps them from stepping on each other:
//! - A FIFO download limiter bounding concurrent asset fetches
//! - A single-flight TTL cache so the catalog is loaded once per window
//! - Per-session idle deadlines that fire exactly once
//! - Generation tokens so a newer request supersedes an older one
//!
//! # Example
//!
//! ```rust,ignore
//! use menuflow_coord::{CatalogFallback, Coordinator, CoordinatorConfig, HttpUpstream};
//!
//! let upstream = Arc::new(HttpUpstream::builder().base_url("http://127.0.0.1:8000").build()?);
//! let coord = Coordinator::new(CoordinatorConfig::default(), upstream.clone(), upstream);
//!
//! coord.touch_session("5045551234");
//! let op = coord.begin_cancelable_operation("5045551234");
//! let catalog = op.guard(coord.fetch_catalog(CatalogFallback::LastGood)).await?;
//! ```

mod assets;
mod cache;
mod catalog;
mod clock;
mod config;
mod coordinator;
mod error;
mod generation;
mod http;
mod idle;
mod limiter;

pub use assets::{AssetFetcher, AssetRef, AssetStore};
pub use cache::{CacheEntry, CacheStats, Fallback, Fetched, SingleFlightCache};
pub use catalog::{Catalog, CatalogFallback, CatalogItem, CatalogLoader, Freshness};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CoordinatorConfig, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_ASSET_DIR, DEFAULT_CATALOG_TIMEOUT,
    DEFAULT_CATALOG_TTL, DEFAULT_DOWNLOAD_CONCURRENCY, DEFAULT_DOWNLOAD_TIMEOUT,
    DEFAULT_IDLE_TIMEOUT,
};
pub use coordinator::{Coordinator, CoordinatorStats, ExpiryHandler, LogExpiry};
pub use error::{Error, Result};
pub use generation::{Generation, Generations};
pub use http::{HttpUpstream, HttpUpstreamBuilder};
pub use idle::{DEFAULT_FINISHED_CAPACITY, IdleSupervisor, SessionState};
pub use limiter::{Limiter, LimiterStats, Permit};
