//! MarketSentry CLI entrypoint: loads configuration, wires the pipeline and
//! runs the cycle loop (or a single cycle with `run --once`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use marketsentry::config::Config;
use marketsentry::engine::MonitorEngine;
use marketsentry::utils::logging::init_logging;

#[derive(Debug, Parser)]
#[command(name = "marketsentry", author, version, about = "Crypto market monitoring pipeline", long_about = None)]
struct Args {
    /// Path to the configuration file (TOML)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit
    #[arg(long)]
    print_default_config: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the monitoring loop
    Run {
        /// Execute a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Generate a default configuration file
    Init {
        /// Output path for the config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

async fn start(config_path: &Path, once: bool) -> Result<()> {
    let config = if config_path.exists() {
        Config::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::default()
    };
    init_logging(&config.app.log_level);
    if !config_path.exists() {
        log::warn!("{} not found, using defaults", config_path.display());
    }
    marketsentry::metrics::init().map_err(|e| anyhow::anyhow!("metrics init: {}", e))?;

    let engine = MonitorEngine::from_config(&config).context("invalid configuration")?;
    if once {
        let report = engine.run_cycle().await;
        println!(
            "cycle complete: {}/{} sources ok, {} events ({} delivered, {} suppressed)",
            report.sources_total - report.sources_degraded,
            report.sources_total,
            report.events,
            report.delivered,
            report.suppressed
        );
        let stats = engine.cache_stats();
        println!(
            "cache: {} hits, {} misses, {} stale served",
            stats.hits, stats.misses, stats.stale_served
        );
    } else {
        engine.run().await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    if args.print_default_config {
        println!("{}", Config::default_toml());
        return Ok(());
    }

    match args.command {
        Some(Command::Init { output, force }) => {
            if output.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
            }
            Config::default()
                .save_to_file(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Wrote default configuration to {}", output.display());
            Ok(())
        }
        Some(Command::Run { once }) => start(&args.config, once).await,
        None => start(&args.config, false).await,
    }
}
