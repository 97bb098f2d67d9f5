//! CLI command handlers.

pub mod catalog;
pub mod config;
pub mod render;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::ValueEnum;

use menuflow_config::{CatalogFallbackSetting, LoadedConfig, MenuflowConfig};
use menuflow_coord::{CatalogFallback, Coordinator, CoordinatorConfig, HttpUpstream, LogExpiry};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration and where it came from.
    pub loaded: LoadedConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// The merged configuration.
    pub fn config(&self) -> &MenuflowConfig {
        &self.loaded.config
    }
}

/// Catalog fallback as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FallbackArg {
    /// Report the failure
    Fail,
    /// Serve the last good catalog
    Stale,
    /// Serve an empty catalog
    Empty,
}

impl From<FallbackArg> for CatalogFallback {
    fn from(arg: FallbackArg) -> Self {
        match arg {
            FallbackArg::Fail => CatalogFallback::Fail,
            FallbackArg::Stale => CatalogFallback::LastGood,
            FallbackArg::Empty => CatalogFallback::Empty,
        }
    }
}

/// Fallback from the command line, else from `[catalog] fallback`.
pub fn resolve_fallback(arg: Option<FallbackArg>, config: &MenuflowConfig) -> CatalogFallback {
    match arg {
        Some(arg) => arg.into(),
        None => match config.catalog().fallback {
            CatalogFallbackSetting::Fail => CatalogFallback::Fail,
            CatalogFallbackSetting::Stale => CatalogFallback::LastGood,
            CatalogFallbackSetting::Empty => CatalogFallback::Empty,
        },
    }
}

/// Map the file configuration onto the coordinator's.
pub fn coordinator_config(config: &MenuflowConfig) -> CoordinatorConfig {
    let catalog = config.catalog();
    let downloads = config.downloads();
    CoordinatorConfig::new()
        .with_catalog_ttl(catalog.ttl())
        .with_max_stale(catalog.max_stale())
        .with_catalog_timeout(config.upstream().timeout())
        .with_download_concurrency(downloads.concurrency)
        .with_download_timeout(downloads.timeout())
        .with_acquire_timeout(downloads.acquire_timeout())
        .with_idle_timeout(config.idle().timeout())
        .with_asset_dir(downloads.asset_dir)
}

/// Build a coordinator wired to the HTTP upstream.
pub fn build_coordinator(ctx: &Context) -> Result<Coordinator> {
    let config = ctx.config();
    let upstream = config.upstream();
    let http = HttpUpstream::builder()
        .base_url(upstream.base_url.clone())
        .catalog_path(upstream.catalog_path.clone())
        .storage_path(upstream.storage_path.clone())
        .timeout(upstream.timeout())
        .build()
        .with_context(|| format!("Failed to set up upstream at {}", upstream.base_url))?;
    let http = Arc::new(http);

    Ok(
        Coordinator::new(coordinator_config(config), http.clone(), http)
            .with_expiry_handler(Arc::new(LogExpiry)),
    )
}
