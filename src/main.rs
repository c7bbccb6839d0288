use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use intake::config::IntakeConfig;
use intake::http::{AppState, HttpServer};
use intake::storage::{LogStore, SledLogStore};
use intake::sweep;

/// Request intake service.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "INTAKE_CONFIG")]
    config: Option<String>,

    /// Override the HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override the database path
    #[arg(long)]
    db: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Intake Request Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = IntakeConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(db) = args.db {
        config.storage.path = db;
    }
    config.validate()?;
    info!(
        listen_addr = %config.server.listen_addr,
        rate_limiting = config.rate_limiting.enabled,
        auth = config.auth.credentials().is_some(),
        "Configuration loaded"
    );

    if let Some(parent) = config.storage.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = Arc::new(SledLogStore::open(&config.storage.path)?);
    let log_store: Arc<dyn LogStore> = store.clone();

    let state = AppState::new(&config, log_store);
    let maintenance = state.spawn_maintenance(&config);
    info!(tasks = maintenance.len(), "Background maintenance started");

    let server = HttpServer::new(config.server.listen_addr, state)
        .with_request_timeout(config.server.request_timeout());

    // Run the server with graceful shutdown on Ctrl+C or SIGTERM
    let served = server.serve_with_shutdown(shutdown_signal()).await;

    if let Err(e) = sweep::shutdown_all(maintenance).await {
        warn!(error = %e, "Background task did not stop cleanly");
    }
    store.flush().await?;
    served?;

    info!("Intake Request Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
