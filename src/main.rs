use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ratekeeper::config::ServiceConfig;
use ratekeeper::http::HttpServer;
use ratekeeper::reconciler::Reconciler;
use ratekeeper::registry::LimiterRegistry;
use ratekeeper::store::SqliteDefinitionStore;

/// Token-emitting rate limiting service.
#[derive(Debug, Parser)]
#[command(name = "ratekeeper", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    address: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// How long an acquire request waits for a token, in milliseconds
    #[arg(long)]
    acquire_timeout_ms: Option<u64>,

    /// SQLite URL of the limiter definition store
    #[arg(long)]
    database_url: Option<String>,

    /// Do not reconcile limiters against the definition store
    #[arg(long)]
    no_reconcile: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Ratekeeper Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli)?;
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    let registry = Arc::new(LimiterRegistry::new());
    let (stop_tx, stop_rx) = watch::channel(false);

    let reconciler_task = if config.reconciler.enabled {
        let store = Arc::new(SqliteDefinitionStore::connect(&config.store.database_url).await?);
        let reconciler = Reconciler::new(registry.clone(), store, config.reconciler.interval())
            .with_prune_missing(config.reconciler.prune_missing);

        // Populate the registry before accepting requests.
        match reconciler.reconcile_once().await {
            Ok(report) => info!(started = report.started.len(), "Initial limiters loaded"),
            Err(e) => warn!(error = %e, "Initial reconciliation failed, starting empty"),
        }

        let mut stop_rx = stop_rx.clone();
        Some(tokio::spawn(reconciler.run(async move {
            let _ = stop_rx.changed().await;
        })))
    } else {
        info!("Reconciliation disabled");
        None
    };

    let server = HttpServer::new(
        config.server.listen_addr,
        registry.clone(),
        config.server.acquire_timeout(),
    );

    // Run the server with graceful shutdown on Ctrl+C
    let served = server.serve_with_shutdown(shutdown_signal()).await;

    let _ = stop_tx.send(true);
    if let Some(task) = reconciler_task {
        if let Err(e) = task.await {
            error!(error = %e, "Reconciler task failed");
        }
    }
    registry.shutdown_all();

    served?;
    info!("Ratekeeper Rate Limiting Service stopped");
    Ok(())
}

/// Build the service configuration from file, environment and CLI flags.
fn load_config(cli: &Cli) -> anyhow::Result<ServiceConfig> {
    let mut config = ServiceConfig::load(cli.config.as_deref())?;

    if cli.address.is_some() || cli.port.is_some() {
        let host = match &cli.address {
            Some(address) => address.parse::<IpAddr>()?,
            None => config.server.listen_addr.ip(),
        };
        let port = cli.port.unwrap_or(config.server.listen_addr.port());
        config.server.listen_addr = SocketAddr::new(host, port);
    }
    if let Some(timeout) = cli.acquire_timeout_ms {
        config.server.acquire_timeout_ms = timeout;
    }
    if let Some(url) = &cli.database_url {
        config.store.database_url = url.clone();
    }
    if cli.no_reconcile {
        config.reconciler.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
