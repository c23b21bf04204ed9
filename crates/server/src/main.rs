//! pallet server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use pallet_core::config::AppConfig;
use pallet_server::reaper::{reap_once, spawn_reaper};
use pallet_server::{AppState, create_router};
use std::net::SocketAddr;
use time::OffsetDateTime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// pallet - resumable, checksum-verified content ingestion
#[derive(Parser, Debug)]
#[command(name = "palletd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "PALLET_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from the optional TOML file, overridden by `PALLET_`
/// environment variables (`__` separates nested keys).
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(config_path = %path, "No config file found, using defaults and environment");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("PALLET_").ignore(&["config"]).split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("pallet v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    if config.server.metrics_enabled {
        pallet_server::metrics::register_metrics();
        tracing::info!("Prometheus metrics registered");
    }

    let storage = pallet_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    // Fail before accepting requests rather than reporting healthy while
    // storage is unusable.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    let metadata = pallet_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let state = AppState::new(config.clone(), storage, metadata);

    // Clear whatever a previous instance left behind before serving.
    let stats = reap_once(&state.uploads, OffsetDateTime::now_utc())
        .await
        .context("startup cleanup failed")?;
    tracing::info!(
        expired = stats.expired,
        orphans = stats.orphans,
        "Startup cleanup finished"
    );

    match config.server.reap_interval() {
        Some(interval) => {
            spawn_reaper(state.uploads.clone(), interval);
            tracing::info!(interval_secs = interval.as_secs(), "Session reaper spawned");
        }
        None => tracing::info!("Session reaper disabled"),
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
