//! Car-Harvest main entry point
//!
//! This is the command-line interface for the Car-Harvest listing harvester.

use anyhow::Context;
use car_harvest::config::{load_config_with_hash, Config};
use car_harvest::orchestrator::Orchestrator;
use car_harvest::output::{format_jobs, format_run_report, load_statistics, print_statistics};
use car_harvest::storage::{self, export, open_store, shared, ExportFormat, SharedStore};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Car-Harvest: a used-vehicle listing harvester
///
/// Car-Harvest crawls used-car marketplaces, normalizes their listings,
/// downloads listing images and keeps everything in a local store.
#[derive(Parser, Debug)]
#[command(name = "car-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A used-vehicle listing harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Run every source daily at `scheduling.time` until interrupted
    #[arg(long)]
    schedule: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the configured sources (default)
    Run {
        /// Crawl only this source
        #[arg(short, long)]
        source: Option<String>,

        /// Override scraping.max_pages_per_source
        #[arg(short, long)]
        pages: Option<u32>,
    },

    /// Export the stored listings
    Export {
        #[arg(short, long, value_enum, default_value = "json")]
        format: ExportFormat,

        /// Output file; defaults to export_<timestamp> next to the store
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show recorded scrape jobs
    Jobs,

    /// Show statistics over the stored listings
    Stats,

    /// Downscale stored images to images.max_width
    OptimizeImages,

    /// Delete images of listings no longer in the store
    CleanImages,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Invalid configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let store = open_store(&config.storage)
        .with_context(|| format!("Cannot open store at {}", config.storage.path))?;
    let store = shared(store);

    match cli.command.unwrap_or(Command::Run {
        source: None,
        pages: None,
    }) {
        Command::Run { source, pages } => {
            if let Some(pages) = pages {
                config.scraping.max_pages_per_source = pages.max(1);
            }
            let schedule = cli.schedule || config.scheduling.enabled;
            handle_run(config, config_hash, store, source, schedule).await?
        }
        Command::Export { format, output } => handle_export(&config, &store, format, output)?,
        Command::Jobs => {
            let jobs = storage::lock(&store).jobs()?;
            print!("{}", format_jobs(&jobs));
        }
        Command::Stats => {
            let stats = load_statistics(&**storage::lock(&store))?;
            print_statistics(&stats);
        }
        Command::OptimizeImages => {
            let orchestrator = Orchestrator::new(config, Some(config_hash), store)?;
            let stats = orchestrator.optimize_images().await?;
            println!(
                "✓ {} image(s) resized, {} already optimized, {} failed",
                stats.resized, stats.untouched, stats.failed
            );
        }
        Command::CleanImages => {
            let orchestrator = Orchestrator::new(config, Some(config_hash), store)?;
            let removed = orchestrator.clean_images().await?;
            println!("✓ Removed images of {} inactive listing(s)", removed);
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("car_harvest=info,warn"),
            1 => EnvFilter::new("car_harvest=debug,info"),
            2 => EnvFilter::new("car_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the crawl, once or on the daily schedule
///
/// Source failures are part of the report, not of the exit code.
async fn handle_run(
    config: Config,
    config_hash: String,
    store: SharedStore,
    source: Option<String>,
    schedule: bool,
) -> anyhow::Result<()> {
    let at = config.scheduling.time_of_day()?;
    let orchestrator = Orchestrator::new(config, Some(config_hash), store)?;

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping at the next page boundary");
            cancel.cancel();
        }
    });

    if schedule {
        orchestrator.run_scheduled(at).await;
        return Ok(());
    }

    let report = orchestrator.run(source.as_deref()).await?;
    print!("{}", format_run_report(&report));
    Ok(())
}

/// Handles the export command
fn handle_export(
    config: &Config,
    store: &SharedStore,
    format: ExportFormat,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let output = output.unwrap_or_else(|| default_export_path(&config.storage.path, format));
    let count = export(&**storage::lock(store), format, &output)
        .with_context(|| format!("Export to {} failed", output.display()))?;
    println!("✓ Exported {} listing(s) to: {}", count, output.display());
    Ok(())
}

fn default_export_path(store_path: &str, format: ExportFormat) -> PathBuf {
    let dir = Path::new(store_path).parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!(
        "export_{}.{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    ))
}
