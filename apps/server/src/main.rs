//! Parlor Server - headless home-theater audio routing proxy.
//!
//! Bridges HTTP/SSE requests from the web remote to the television
//! (WebSocket), the soundbar (UPnP/SOAP), and the soundbar's smart plug,
//! and runs as a background daemon on the home network.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use parlor_core::{bootstrap, start_server};
use tokio::signal;

use crate::config::ServerConfig;

/// Parlor Server - local audio routing proxy for the living room.
#[derive(Parser, Debug)]
#[command(name = "parlor-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "PARLOR_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "PARLOR_BIND_PORT")]
    port: Option<u16>,

    /// Television IP address (overrides config file).
    #[arg(long, env = "PARLOR_TV_IP")]
    tv_ip: Option<String>,

    /// Data directory for the television pairing key.
    #[arg(short = 'd', long, env = "PARLOR_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Parlor Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(tv_ip) = args.tv_ip {
        config.tv_ip = Some(tv_ip);
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = Some(data_dir);
    }

    if let Some(ref data_dir) = config.data_dir {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;
        log::info!("Using data directory: {}", data_dir.display());
    } else {
        log::info!("No data directory configured - the pairing key will not persist");
    }

    let core_config = config.to_core_config();
    core_config
        .timings
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid timing configuration")?;

    log::info!(
        "Configuration: bind_port={}, tv={}, soundbar={}, plug={}",
        config.bind_port,
        config.tv_ip.as_deref().unwrap_or("unset"),
        config.sonos_ip.as_deref().unwrap_or("unset"),
        config.plug_ip.as_deref().unwrap_or("unset"),
    );

    let app_state = bootstrap(core_config);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    log::info!("HTTP server started on port {}", config.bind_port);
    log::info!("If this is the first connection, accept the pairing prompt on the television.");

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");
    server_handle.abort();
    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
