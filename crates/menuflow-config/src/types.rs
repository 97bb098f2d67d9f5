//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [upstream]     # menu API location
//! [catalog]      # catalog TTL and fallback
//! [downloads]    # image download limits
//! [idle]         # session idle deadline
//! [logging]      # console filter and log file
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MenuflowConfig {
    /// Menu API settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamConfig>,

    /// Shared catalog cache settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<CatalogConfig>,

    /// Asset download settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads: Option<DownloadsConfig>,

    /// Session idle settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle: Option<IdleConfig>,

    /// Logging settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

impl MenuflowConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, not field by field.
    pub fn merge(&mut self, other: MenuflowConfig) {
        if other.upstream.is_some() {
            self.upstream = other.upstream;
        }

        if other.catalog.is_some() {
            self.catalog = other.catalog;
        }

        if other.downloads.is_some() {
            self.downloads = other.downloads;
        }

        if other.idle.is_some() {
            self.idle = other.idle;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// The `[upstream]` section, or its defaults.
    pub fn upstream(&self) -> UpstreamConfig {
        self.upstream.clone().unwrap_or_default()
    }

    /// The `[catalog]` section, or its defaults.
    pub fn catalog(&self) -> CatalogConfig {
        self.catalog.clone().unwrap_or_default()
    }

    /// The `[downloads]` section, or its defaults.
    pub fn downloads(&self) -> DownloadsConfig {
        self.downloads.clone().unwrap_or_default()
    }

    /// The `[idle]` section, or its defaults.
    pub fn idle(&self) -> IdleConfig {
        self.idle.clone().unwrap_or_default()
    }

    /// The `[logging]` section, or its defaults.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Reject values the coordinator cannot run with.
    pub fn validate(&self) -> Result<()> {
        let upstream = self.upstream();
        if upstream.base_url.trim().is_empty() {
            return Err(invalid("upstream.base_url", "must not be empty"));
        }
        if upstream.timeout_secs == 0 {
            return Err(invalid("upstream.timeout_secs", "must be at least 1"));
        }
        if self.catalog().ttl_ms == 0 {
            return Err(invalid("catalog.ttl_ms", "must be at least 1"));
        }

        let downloads = self.downloads();
        if downloads.concurrency == 0 {
            return Err(invalid("downloads.concurrency", "must be at least 1"));
        }
        if downloads.timeout_secs == 0 {
            return Err(invalid("downloads.timeout_secs", "must be at least 1"));
        }
        if downloads.acquire_timeout_secs == 0 {
            return Err(invalid("downloads.acquire_timeout_secs", "must be at least 1"));
        }

        if self.idle().timeout_secs == 0 {
            return Err(invalid("idle.timeout_secs", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Upstream Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Menu API location.
///
/// ```toml
/// [upstream]
/// base_url = "http://127.0.0.1:8000"
/// catalog_path = "admin/menu/MenuHoy"
/// storage_path = "storage"
/// timeout_secs = 10
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the menu API.
    pub base_url: String,
    /// Path of the catalog endpoint, relative to `base_url`.
    pub catalog_path: String,
    /// Path relative image references resolve under.
    pub storage_path: String,
    /// Catalog request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            catalog_path: "admin/menu/MenuHoy".to_string(),
            storage_path: "storage".to_string(),
            timeout_secs: 10,
        }
    }
}

impl UpstreamConfig {
    /// Catalog request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// What to serve when the catalog cannot be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogFallbackSetting {
    /// Report the failure.
    Fail,
    /// Serve the last good catalog.
    #[default]
    Stale,
    /// Serve an empty catalog.
    Empty,
}

/// Shared catalog cache settings.
///
/// ```toml
/// [catalog]
/// ttl_ms = 6000
/// max_stale_secs = 300
/// fallback = "stale"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// How long a loaded catalog is reused, in milliseconds.
    pub ttl_ms: u64,
    /// Oldest catalog served as a fallback, in seconds. Unset means any age.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_stale_secs: Option<u64>,
    /// Behaviour when a load fails.
    pub fallback: CatalogFallbackSetting,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 6000,
            max_stale_secs: None,
            fallback: CatalogFallbackSetting::default(),
        }
    }
}

impl CatalogConfig {
    /// Catalog freshness window.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Bound on fallback age.
    pub fn max_stale(&self) -> Option<Duration> {
        self.max_stale_secs.map(Duration::from_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Downloads Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Asset download settings.
///
/// ```toml
/// [downloads]
/// concurrency = 3
/// timeout_secs = 15
/// acquire_timeout_secs = 30
/// asset_dir = ".tmp_images"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadsConfig {
    /// Maximum concurrent downloads across all sessions.
    pub concurrency: usize,
    /// Per-download timeout in seconds.
    pub timeout_secs: u64,
    /// How long to wait for a download slot, in seconds.
    pub acquire_timeout_secs: u64,
    /// Where downloaded images are kept.
    pub asset_dir: PathBuf,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            timeout_secs: 15,
            acquire_timeout_secs: 30,
            asset_dir: PathBuf::from(".tmp_images"),
        }
    }
}

impl DownloadsConfig {
    /// Per-download timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Download slot wait deadline.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Idle / Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session idle settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    /// Seconds without activity before a session expires.
    pub timeout_secs: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl IdleConfig {
    /// Idle deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging settings.
///
/// ```toml
/// [logging]
/// filter = "menuflow=debug,menuflow_coord=trace"
/// file = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Console filter directive. `RUST_LOG` wins when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Whether to write the daily JSON log file.
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            file: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
