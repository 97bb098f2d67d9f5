//! Render command - walk the catalog for one session.
//!
//! Mirrors what the conversation engine does when a customer asks for the
//! menu: touch the session, start a cancelable operation, fetch the shared
//! catalog, download item images through the limiter, then clean up.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use menuflow_coord::{Catalog, Coordinator, Generation};

use super::catalog::{freshness_label, item_line};
use super::{Context, FallbackArg, build_coordinator, resolve_fallback};

/// Arguments for the render command.
#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Session key (default: a random one)
    #[arg(long)]
    pub session: Option<String>,

    /// Skip image downloads
    #[arg(long)]
    pub no_images: bool,

    /// What to serve if the menu API is down (default from config)
    #[arg(long, value_enum)]
    pub fallback: Option<FallbackArg>,
}

/// One rendered item for JSON output.
#[derive(Debug, Serialize)]
struct RenderedItem {
    id: u64,
    name: String,
    unit_price: f64,
    available: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_error: Option<String>,
}

/// Render output for JSON mode.
#[derive(Debug, Serialize)]
struct RenderOutput {
    session: String,
    freshness: String,
    items: Vec<RenderedItem>,
    purged: usize,
}

/// Run the render command.
pub async fn run(args: RenderArgs, ctx: &Context) -> Result<()> {
    let coord = build_coordinator(ctx)?;
    let session = args
        .session
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let fallback = resolve_fallback(args.fallback, ctx.config());

    coord.touch_session(&session);
    let op = coord.begin_cancelable_operation(&session);
    info!(session = %session, token = op.token(), "Render started");

    let catalog = match op.guard(coord.fetch_catalog(fallback)).await {
        Ok(catalog) => catalog,
        Err(e) if e.is_superseded() => {
            debug!(session = %session, "Render superseded before the catalog arrived");
            coord.end_session(&session);
            coord.shutdown();
            return Ok(());
        }
        Err(e) => {
            coord.end_session(&session);
            return Err(e.into());
        }
    };

    let mut downloads = JoinSet::new();
    if !args.no_images {
        for item in &catalog.items {
            let Some(asset) = item.image.clone() else {
                continue;
            };
            let coord = coord.clone();
            let op = op.clone();
            let id = item.id;
            downloads.spawn(async move { (id, coord.download_for(&op, &asset).await) });
        }
    }

    let mut images = HashMap::new();
    while let Some(joined) = downloads.join_next().await {
        match joined {
            Ok((id, result)) => {
                images.insert(id, result);
            }
            Err(e) => warn!(error = %e, "Download task failed"),
        }
    }

    let rendered = match render_items(&op, &catalog, images) {
        Ok(rendered) => rendered,
        Err(e) => {
            // A newer request owns the session now; this one stays silent.
            debug!(session = %session, error = %e, "Render superseded, dropping output");
            purge(&coord).await;
            coord.end_session(&session);
            coord.shutdown();
            return Ok(());
        }
    };

    let purged = purge(&coord).await;
    coord.end_session(&session);
    coord.shutdown();

    let freshness = freshness_label(&catalog.freshness);
    if ctx.json_output {
        let output = RenderOutput {
            session,
            freshness,
            items: rendered,
            purged,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    println!("{} {}", style("Menu for").bold(), style(&session).cyan());
    println!("{}", dim.apply_to(format!("catalog: {freshness}")));
    println!("{}", dim.apply_to("─".repeat(40)));
    for (item, out) in catalog.items.iter().zip(&rendered) {
        println!("  {}", item_line(item));
        if let Some(path) = &out.image {
            println!("      {}", dim.apply_to(path.display()));
        }
        if let Some(error) = &out.image_error {
            let warning = format!("image unavailable: {error}");
            println!("      {}", Style::new().yellow().apply_to(warning));
        }
    }
    println!();
    if ctx.verbose {
        let stats = coord.stats();
        println!(
            "{}",
            dim.apply_to(format!(
                "downloads peak {}/{}, catalog loads {}, purged {}",
                stats.limiter.peak_in_use, stats.limiter.capacity, stats.catalog.loads, purged
            ))
        );
    }

    Ok(())
}

/// Build one output row per item, checkpointing before each.
fn render_items(
    op: &Generation,
    catalog: &Catalog,
    mut images: HashMap<u64, menuflow_coord::Result<PathBuf>>,
) -> menuflow_coord::Result<Vec<RenderedItem>> {
    let mut rendered = Vec::with_capacity(catalog.len());
    for item in &catalog.items {
        op.checkpoint()?;
        let (image, image_error) = match images.remove(&item.id) {
            Some(Ok(path)) => (Some(path), None),
            Some(Err(e)) => (None, Some(e.to_string())),
            None => (None, None),
        };
        rendered.push(RenderedItem {
            id: item.id,
            name: item.name.clone(),
            unit_price: item.unit_price,
            available: item.available,
            image,
            image_error,
        });
    }
    Ok(rendered)
}

async fn purge(coord: &Coordinator) -> usize {
    match coord.purge_assets().await {
        Ok(purged) => purged,
        Err(e) => {
            warn!(error = %e, "Failed to purge downloaded images");
            0
        }
    }
}
