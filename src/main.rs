//! Cooking game order bot
//!
//! Reads the recipe and ingredient panels of the game with Tesseract OCR and
//! types the matching ingredient keys, page by page, then serves the order.

mod automation;
mod capture;
mod logging;
mod ocr;
mod paths;
mod recipe;

#[cfg(test)]
mod testing;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use automation::config::{load_config, save_config, BotConfig};

#[derive(Parser)]
#[command(name = "csd2-bot")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "OCR-driven order bot for a cooking game", long_about = None)]
struct Cli {
    /// Path to config.json (defaults to the one next to the executable)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config
    #[arg(long = "log-level", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live order loop (Windows)
    Run {
        /// Stop after this many orders
        #[arg(long = "max-orders")]
        max_orders: Option<u32>,
    },
    /// Process one order from a saved full-screen screenshot; keys are only logged
    DryRun {
        /// Screenshot of the whole screen (PNG)
        #[arg(long)]
        screenshot: PathBuf,
    },
    /// Write the default configuration
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(paths::get_config_path);

    let command = match cli.command {
        Commands::InitConfig { force } => return init_config(&config_path, force),
        command => command,
    };

    paths::ensure_directories()?;

    // Loaded before the subscriber exists because it names the log level
    let loaded = load_config(&config_path);
    let level = cli
        .log_level
        .or_else(|| loaded.as_ref().ok().map(|(c, _)| c.bot_settings.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    logging::init_logging(&level, &paths::get_logs_dir().join("csd2_bot.log"))?;
    logging::install_panic_hook();

    info!("csd2-bot {} starting", env!("CARGO_PKG_VERSION"));
    let (config, source) = loaded.inspect_err(|e| error!("{:#}", e))?;
    source.log(&config_path);

    let summary = match command {
        Commands::Run { max_orders } => automation::run_live(config, max_orders)?,
        Commands::DryRun { screenshot } => automation::dry_run(config, &screenshot)?,
        Commands::InitConfig { .. } => return Ok(()),
    };
    info!(
        "Done: {} served, {} aborted, {} failed",
        summary.served, summary.aborted, summary.failed
    );
    Ok(())
}

fn init_config(path: &std::path::Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(anyhow!(
            "{} already exists; pass --force to overwrite",
            path.display()
        ));
    }
    save_config(&BotConfig::default(), path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
