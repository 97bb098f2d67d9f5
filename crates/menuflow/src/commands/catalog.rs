//! Catalog command - fetch the shared catalog once.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use menuflow_coord::{Catalog, CatalogItem, Freshness};

use super::{Context, FallbackArg, build_coordinator, resolve_fallback};

/// Arguments for the catalog command.
#[derive(Args, Debug)]
pub struct CatalogArgs {
    /// What to serve if the menu API is down (default from config)
    #[arg(long, value_enum)]
    pub fallback: Option<FallbackArg>,
}

/// Catalog output for JSON mode.
#[derive(Debug, Serialize)]
struct CatalogOutput<'a> {
    freshness: String,
    items: &'a [CatalogItem],
}

/// Run the catalog command.
pub async fn run(args: CatalogArgs, ctx: &Context) -> Result<()> {
    let coord = build_coordinator(ctx)?;
    let fallback = resolve_fallback(args.fallback, ctx.config());
    let catalog = coord.fetch_catalog(fallback).await?;

    if ctx.json_output {
        let output = CatalogOutput {
            freshness: freshness_label(&catalog.freshness),
            items: &catalog.items,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_catalog(&catalog, ctx.verbose);
    }

    Ok(())
}

/// Short description of how a catalog was obtained.
pub fn freshness_label(freshness: &Freshness) -> String {
    match freshness {
        Freshness::Fresh => "fresh".to_string(),
        Freshness::Stale { age } => format!("stale ({}s old)", age.as_secs()),
        Freshness::Empty => "empty".to_string(),
    }
}

fn print_catalog(catalog: &Catalog, verbose: bool) {
    let dim = Style::new().dim();

    println!();
    println!("{}", style("Today's Menu").bold());
    println!("{}", dim.apply_to("─".repeat(40)));

    match catalog.freshness {
        Freshness::Fresh => {}
        Freshness::Stale { .. } => println!(
            "  {}",
            Style::new()
                .yellow()
                .apply_to(format!("Serving {} copy", freshness_label(&catalog.freshness)))
        ),
        Freshness::Empty => println!(
            "  {}",
            Style::new().yellow().apply_to("Menu unavailable")
        ),
    }

    if catalog.is_empty() {
        println!("  {}", dim.apply_to("No items"));
    }
    for item in &catalog.items {
        println!("  {}", item_line(item));
        if verbose && let Some(description) = &item.description {
            println!("      {}", dim.apply_to(description));
        }
    }
    println!();
}

/// One display line for an item.
pub fn item_line(item: &CatalogItem) -> String {
    let stock = if item.is_sold_out() {
        Style::new().red().apply_to("sold out".to_string())
    } else {
        Style::new().green().apply_to(format!("{} left", item.available))
    };
    format!("#{:<4} {:<28} L {:>8.2}  {}", item.id, item.name, item.unit_price, stock)
}
