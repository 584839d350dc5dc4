//! Radar alert service (kxradar-ext) - Main entry point
//!
//! Reads host events from stdin, one JSON object per line, and plays radar
//! alerts according to the persisted settings.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kxradar_common::config::{self, STORE_DIR_ENV};
use kxradar_ext::{run_service, ServiceOptions};
use tokio::io::BufReader;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the TOML logging level is set
const DEFAULT_LOG_FILTER: &str = "kxradar_ext=debug,kxradar_common=info";

/// Command-line arguments for kxradar-ext
#[derive(Parser, Debug)]
#[command(name = "kxradar-ext")]
#[command(about = "Radar alert service for the cycling computer extension")]
#[command(version)]
struct Args {
    /// Bootstrap TOML file (defaults to the platform config folder)
    #[arg(short, long, env = "KXRADAR_CONFIG")]
    config: Option<PathBuf>,

    /// Settings store folder (overrides KXRADAR_STORE_DIR and the TOML file)
    #[arg(short, long)]
    store_dir: Option<PathBuf>,

    /// Buffer size for each host subscription
    #[arg(long)]
    stream_capacity: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Bootstrap config comes first: it may carry the log filter
    let toml_config = config::load_or_default(args.config.as_deref())
        .context("Failed to load bootstrap config")?;

    let default_filter = toml_config
        .logging
        .level
        .clone()
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting kxradar-ext v{}", env!("CARGO_PKG_VERSION"));

    let stream_capacity = args.stream_capacity.unwrap_or(toml_config.stream_capacity);
    anyhow::ensure!(stream_capacity > 0, "stream capacity must be at least 1");

    let options = ServiceOptions {
        store_dir: config::resolve_store_dir(
            args.store_dir.as_deref(),
            STORE_DIR_ENV,
            Some(&toml_config),
        ),
        stream_capacity,
        event_capacity: toml_config.event_capacity,
    };

    let input = BufReader::new(tokio::io::stdin());
    let report = run_service(options, input, shutdown_signal()).await?;

    info!(
        "Shutdown complete: {} alerts dispatched, {} events logged",
        report.dispatched.len(),
        report.events_logged
    );
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
