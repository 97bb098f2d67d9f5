//! Config command - configuration inspection.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use console::style;
use serde::Serialize;

use menuflow_config::MenuflowConfig;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: Option<ConfigCommand>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the merged configuration (default)
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Show configuration file path
    Path,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./menuflow.toml) instead of user config
        #[arg(long)]
        local: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Sources listing for JSON output.
#[derive(Debug, Serialize)]
struct SourceOutput {
    path: PathBuf,
    loaded: bool,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command.unwrap_or(ConfigCommand::Show) {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Path => cmd_path(ctx),
        ConfigCommand::Init { local, force } => cmd_init(local, force),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let resolved = resolved(ctx.config());

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }

    println!("# menuflow configuration\n");
    let sources = ctx.loaded.loaded_from();
    if sources.is_empty() {
        println!("# No config files loaded (using defaults)\n");
    } else {
        for source in &sources {
            println!("# from {}", source.display());
        }
        println!();
    }
    print!("{}", resolved.to_toml()?);

    for warning in &ctx.loaded.warnings {
        println!("\n{} {}", style("warning:").yellow(), warning);
    }
    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    if ctx.json_output {
        let sources: Vec<SourceOutput> = ctx
            .loaded
            .sources
            .iter()
            .map(|s| SourceOutput {
                path: s.path.clone(),
                loaded: s.loaded,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    println!("Config files (lowest precedence first):");
    for source in &ctx.loaded.sources {
        let marker = if source.loaded {
            style("loaded").green()
        } else {
            style("not found").dim()
        };
        println!("  {}  {}", source.path.display(), marker);
    }
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    match ctx.loaded.sources.first() {
        Some(source) => println!("{}", source.path.display()),
        None => bail!("Could not determine a config directory"),
    }
    Ok(())
}

fn cmd_init(local: bool, force: bool) -> Result<()> {
    let path = if local {
        PathBuf::from("menuflow.toml")
    } else {
        match menuflow_config::user_config_path() {
            Some(path) => path,
            None => bail!("Could not determine a config directory; use --local"),
        }
    };

    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    menuflow_config::save_config(&resolved(&MenuflowConfig::default()), &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Every section filled in, for display and templates.
fn resolved(config: &MenuflowConfig) -> MenuflowConfig {
    MenuflowConfig {
        upstream: Some(config.upstream()),
        catalog: Some(config.catalog()),
        downloads: Some(config.downloads()),
        idle: Some(config.idle()),
        logging: Some(config.logging()),
    }
}
