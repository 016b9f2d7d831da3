//! Archive Agent - Main entry point
//!
//! Runs full/incremental tar backups on a fixed interval.

use anyhow::{Context, Result};
use archive_agent::{
    config::Config,
    daemon::shutdown::ShutdownCoordinator,
    executor::BackupKind,
    scheduler::{plan_for, BackupRunner, Scheduler},
    utils,
};
use chrono::{Datelike, Local};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Destination directory (overrides config)
    #[arg(short, long, value_name = "DIR")]
    destination: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run a single backup and exit
    #[arg(long)]
    once: bool,

    /// Force the backup kind for --once (full, incremental)
    #[arg(short, long, requires = "once")]
    kind: Option<BackupKind>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::default()
    };
    config.apply_env_overrides();

    if let Some(level) = args.log_level {
        config.log.level = level;
    }
    if let Some(destination) = args.destination {
        config.backup.destination = destination;
    }
    config.validate().context("invalid configuration")?;

    // Initialize logging
    utils::logger::init(&config.log)?;

    tracing::info!(
        "Starting archive-agent v{} (agent_id: {})",
        env!("CARGO_PKG_VERSION"),
        config.agent.id
    );
    tracing::info!("Sources: {}", config.backup.sources.join(", "));
    tracing::info!("Destination: {}", config.backup.destination.display());

    let runner = Arc::new(BackupRunner::new(&config));

    if args.once {
        let now = Local::now();
        let label = match args.kind {
            Some(kind) => kind.default_label(),
            None => plan_for(now.day(), &config.schedule),
        };
        tokio::task::spawn_blocking(move || runner.run_once(label, now.naive_local()))
            .await?
            .context("backup run failed")?;
        return Ok(());
    }

    // Create shutdown coordinator
    let shutdown_coordinator = ShutdownCoordinator::new();
    let scheduler = Scheduler::new(runner, config.schedule.clone(), shutdown_coordinator.token());
    let scheduler_handle = tokio::spawn(async move { scheduler.run().await });

    // Wait for shutdown signal
    shutdown_coordinator.wait_for_signal().await?;

    // The scheduler finishes a run in progress before returning
    let runs = scheduler_handle.await?;
    tracing::info!("Shutdown complete after {} run(s)", runs);

    Ok(())
}
