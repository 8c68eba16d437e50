//! msync-worker - queue consumer for the museum CRM sync
//!
//! Connects to the database, broker and CRM, then consumes `sync_queue` and
//! the per-entity queues until Ctrl+C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use msync_common::broker;
use msync_common::config::{AppConfig, BrokerKind, ConfigOverrides};
use msync_common::crm::HttpCrmClient;
use msync_common::db::Database;
use msync_common::sync::SyncServices;
use msync_worker::Worker;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for msync-worker
#[derive(Parser, Debug)]
#[command(name = "msync-worker")]
#[command(about = "Queue consumer for the museum CRM sync")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, env = "MSYNC_CONFIG", default_value = "msync.toml")]
    config: PathBuf,

    /// Database URL (overrides config)
    #[arg(short, long)]
    database: Option<String>,

    /// AMQP broker URL (overrides config)
    #[arg(long)]
    broker_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(Some(&args.config)).context("Failed to load configuration")?;
    config.apply_overrides(ConfigOverrides {
        port: None,
        database_url: args.database,
        broker_url: args.broker_url,
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting msync-worker v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        args.config.display()
    );

    if config.broker.kind == BrokerKind::Memory {
        warn!("Broker kind is memory; only messages published inside this process are seen");
    }

    let db = Arc::new(
        Database::connect(&config.database)
            .await
            .context("Failed to connect to database")?,
    );
    let broker = broker::connect(&config.broker)
        .await
        .context("Failed to connect to message broker")?;
    let crm = Arc::new(HttpCrmClient::new(&config.crm).context("Failed to create CRM client")?);

    let services = SyncServices::new(db.clone(), crm, Some(broker.clone()), &config);
    let worker = Worker::new(services, broker.clone(), db.clone());

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let result = worker.run(shutdown).await;

    if let Err(e) = broker.close().await {
        warn!(error = %e, "Error closing message broker");
    }
    db.close().await;

    result.context("Worker failed")?;
    info!("Worker shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
