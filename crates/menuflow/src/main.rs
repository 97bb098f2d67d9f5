//! menuflow - coordination core for conversational ordering
//!
//! Main entry point for the menuflow CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{catalog, config, render};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// menuflow - coordination core for conversational ordering
#[derive(Parser)]
#[command(name = "menuflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding config.toml and logs
    #[arg(long, global = true, env = "MENUFLOW_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Menu API base URL (overrides [upstream] base_url)
    #[arg(long, global = true, env = "MENUFLOW_UPSTREAM_URL")]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch the shared catalog once and print it
    Catalog(catalog::CatalogArgs),

    /// Walk the catalog for one session, downloading images
    Render(render::RenderArgs),

    /// Show configuration and where it was loaded from
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut loaded = menuflow_config::load_config(None, cli.config_dir.as_deref())?;
    if let Some(url) = &cli.base_url {
        let mut upstream = loaded.config.upstream();
        upstream.base_url = url.clone();
        loaded.config.upstream = Some(upstream);
    }
    let logging = loaded.config.logging();

    // Initialize tracing: console (human-readable) + rotating JSON file
    let filter = match (&logging.filter, cli.verbose) {
        (_, true) => "menuflow=debug,menuflow_coord=debug,menuflow_config=debug,info".to_string(),
        (Some(filter), false) => filter.clone(),
        (None, false) => "menuflow=info,menuflow_coord=info,warn".to_string(),
    };

    let log_dir = cli
        .config_dir
        .clone()
        .or_else(menuflow_config::user_config_dir)
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let (file_layer, _guard) = if logging.file {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "menuflow.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        (Some(non_blocking), Some(guard))
    } else {
        (None, None)
    };

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(file_layer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "menuflow=trace,menuflow_coord=trace,menuflow_config=trace,info",
                ))
        }))
        .init();

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    // Create context for commands
    let ctx = commands::Context {
        loaded,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Catalog(args) => catalog::run(args, &ctx).await,
        Commands::Render(args) => render::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
