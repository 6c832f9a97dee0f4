//! Sluice Binary Entry Point
//!
//! Runs the ingestion server, the batching collector and the shard router.
//! Core functionality is provided by the `sluice` library crate.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sluice::{
    collector::Collector,
    config::{AppConfig, parse_duration},
    schema::{SchemaDefinition, SchemaMapper},
    server::{AppState, create_router},
    storage::connect_all,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sluice - schema-mapped event ingestion
#[derive(Parser, Debug)]
#[command(name = "sluice", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "SLUICE_CONFIG"
    )]
    config: PathBuf,

    /// Server bind address (overrides config file)
    #[arg(long, env = "SLUICE_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "SLUICE_SERVER_PORT")]
    server_port: Option<u16>,

    /// Flush interval, e.g. `500ms` (overrides config file)
    #[arg(long, env = "SLUICE_FLUSH_INTERVAL", value_parser = parse_duration)]
    flush_interval: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sluice=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    tracing::info!(config = %cli.config.display(), "Loading configuration");

    let mut config = AppConfig::load(&cli.config)?;
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    if let Some(interval) = cli.flush_interval {
        config.collector.flush_interval = interval;
    }
    config.validate()?;

    let store = Arc::new(connect_all(&config.databases).await?);
    tracing::info!(shards = store.shard_count(), "Shard router ready");

    let schema = SchemaDefinition::load_from_file(&config.schema)?;
    tracing::info!(
        schema = %config.schema.display(),
        events = schema.events.len(),
        common_properties = schema.common_properties.len(),
        "Schema loaded"
    );

    let mapper = Arc::new(SchemaMapper::new(
        Arc::clone(&store),
        schema,
        config.collector.table_timezone,
    ));
    mapper.reconcile_mappings().await?;

    let collector = Arc::new(Collector::new(
        mapper,
        Arc::clone(&store),
        config.collector.clone(),
    ));
    collector.start()?;

    let shutdown = CancellationToken::new();
    let app = create_router(AppState {
        collector: Arc::clone(&collector),
        shutdown: shutdown.clone(),
    });

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Ingestion server listening on: http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Stopping collector...");
    if let Err(e) = collector.shutdown().await {
        tracing::error!(error = %e, "Failed to stop collector");
    }

    tracing::info!("Closing stores...");
    store.close().await;
    Ok(())
}

/// Resolve on Ctrl+C, SIGTERM or an HTTP shutdown request.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
        _ = token.cancelled() => {
            tracing::info!("Received shutdown request");
        }
    }
    token.cancel();
}
