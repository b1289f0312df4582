use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lapse_server::config::LapseConfig;
use lapse_server::factory::{create_byte_store, create_metadata_store};
use lapse_storage::{Storage, Sweeper};

/// Lapse temporary file storage.
#[derive(Parser, Debug)]
#[command(name = "lapse-server", about = "Temporary file storage with TTL expiry")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "lapse.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Default)]
enum Commands {
    /// Run the periodic lifecycle sweeper until interrupted.
    #[default]
    Run,
    /// Run one sweep cycle and print its summary.
    Sweep,
    /// Remove unreferenced objects from the byte store and print a report.
    Reconcile,
    /// Print aggregate statistics.
    Stats,
    /// Probe both backends. Exits non-zero if either is unhealthy.
    Health,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    lapse_server::telemetry::init();

    let (config, found) = LapseConfig::load(&cli.config)?;
    if !found {
        info!(path = %cli.config.display(), "config file not found, using defaults");
    }

    let blob = create_byte_store(&config.blob).await?;
    let meta = create_metadata_store(&config.metadata).await?;
    let storage = Arc::new(Storage::new(blob, meta, config.storage.clone()));
    let sweep_config = config.sweeper.to_sweep_config();

    match cli.command.unwrap_or_default() {
        Commands::Run => {
            if !config.sweeper.enabled {
                warn!("sweeper disabled in configuration; nothing to run");
                return Ok(());
            }
            let interval = sweep_config.interval;
            let sweeper = Sweeper::new(Arc::clone(&storage), sweep_config);
            let shutdown = CancellationToken::new();

            let signal = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                signal.cancel();
            });

            sweeper.run_periodic(interval, shutdown).await;
            let metrics = storage.metrics().snapshot();
            info!(
                sweeps_run = metrics.sweeps_run,
                expired_deleted = metrics.expired_deleted,
                orphans_deleted = metrics.orphans_deleted,
                "lapse stopped"
            );
        }
        Commands::Sweep => {
            let sweeper = Sweeper::new(Arc::clone(&storage), sweep_config);
            if let Some(summary) = sweeper.run().await {
                print_json(&summary)?;
            }
        }
        Commands::Reconcile => {
            let report = storage.reconcile_orphans(&CancellationToken::new()).await?;
            print_json(&report)?;
        }
        Commands::Stats => {
            let stats = storage.stats().await?;
            print_json(&stats)?;
        }
        Commands::Health => {
            let status = storage.health().await;
            print_json(&status)?;
            if !status.is_healthy() {
                return Err("one or more backends are unhealthy".into());
            }
        }
    }

    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
