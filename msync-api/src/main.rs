//! msync-api - HTTP surface and daily scheduler
//!
//! Serves the sync trigger, parking, sales and report endpoints. With an
//! AMQP broker configured, sync requests are queued for msync-worker;
//! otherwise they run in this process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use msync_common::broker::{self, MessageBroker};
use msync_common::config::{AppConfig, BrokerKind, ConfigOverrides};
use msync_common::crm::HttpCrmClient;
use msync_common::db::Database;
use msync_common::scheduler::SchedulerService;
use msync_common::sync::SyncServices;
use msync_api::{build_router, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for msync-api
#[derive(Parser, Debug)]
#[command(name = "msync-api")]
#[command(about = "HTTP API and scheduler for the museum CRM sync")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, env = "MSYNC_CONFIG", default_value = "msync.toml")]
    config: PathBuf,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

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
        port: args.port,
        database_url: args.database,
        broker_url: args.broker_url,
    });

    // RUST_LOG wins over [logging] level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting msync-api v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        args.config.display()
    );

    let db = Arc::new(
        Database::connect(&config.database)
            .await
            .context("Failed to connect to database")?,
    );

    // An in-memory broker is only visible inside this process, so without
    // AMQP the API runs syncs itself
    let broker: Option<Arc<dyn MessageBroker>> = match config.broker.kind {
        BrokerKind::Amqp => Some(
            broker::connect(&config.broker)
                .await
                .context("Failed to connect to message broker")?,
        ),
        BrokerKind::Memory => {
            info!("No external broker configured; syncs run in-process");
            None
        }
    };

    let crm = Arc::new(HttpCrmClient::new(&config.crm).context("Failed to create CRM client")?);
    let services = SyncServices::new(db.clone(), crm, broker.clone(), &config);

    let shutdown = CancellationToken::new();

    let scheduler = if config.scheduler.enabled {
        let scheduler = SchedulerService::new(services.clone(), broker.clone(), &config.scheduler)
            .register_all();
        Some(scheduler.spawn(shutdown.clone()))
    } else {
        warn!("Daily scheduler disabled");
        None
    };

    let state = AppState::new(db.clone(), services, broker.clone());
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("msync-api listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
    }
    if let Some(broker) = broker {
        if let Err(e) = broker.close().await {
            warn!(error = %e, "Error closing message broker");
        }
    }
    db.close().await;

    info!("Server shutdown complete");
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
