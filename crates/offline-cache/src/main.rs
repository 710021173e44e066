//! Offline Cache - serves a web application from a versioned local cache

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::Config;
use offline_api::{AppState, create_router};
use offline_core::{
    CacheConfig, CacheManager, DeploymentSource, RouteTable, UpdateOutcome, check_for_update,
    spawn_update_task,
};
use offline_proxy::{OriginClient, OriginClientConfig};
use offline_storage::{CacheStorage, LocalStorage, MemoryStorage};

/// Offline Cache - offline asset cache and request interceptor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "OFFLINE_CACHE_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "OFFLINE_CACHE_PORT")]
    port: Option<u16>,

    /// Deployment manifest path
    #[arg(long, env = "OFFLINE_CACHE_DEPLOYMENT")]
    deployment: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config)?;

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format);

    info!("Starting Offline Cache v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    // Initialize storage backend
    let storage: Arc<dyn CacheStorage> = match config.storage.backend.as_str() {
        "memory" => {
            info!("Using in-memory cache storage");
            Arc::new(MemoryStorage::new())
        }
        _ => Arc::new(LocalStorage::new(&config.storage.local.path).await?),
    };

    // Initialize origin client
    let upstream = Arc::new(OriginClient::new(OriginClientConfig {
        url: config.upstream.url.clone(),
        skip_tls_verify: config.upstream.skip_tls_verify,
        timeout: config.upstream.timeout(),
    })?);

    // Initialize cache manager
    let routes = RouteTable::new(config.routes.clone())?;
    let cache_config = CacheConfig {
        install_concurrency: config.deployment.install_concurrency,
    };
    let manager = Arc::new(CacheManager::new(
        storage,
        upstream.clone(),
        routes,
        cache_config,
    ));

    let source = DeploymentSource {
        manifest_path: PathBuf::from(
            args.deployment
                .unwrap_or_else(|| config.deployment.manifest_path.clone()),
        ),
        pages: config.deployment.pages.clone(),
    };

    // Bring up the published generation; requests pass through until one is active
    match check_for_update(&manager, &source).await {
        Ok(UpdateOutcome::UpToDate { generation }) => {
            info!("Generation {} already active", generation);
        }
        Ok(UpdateOutcome::Updated { restored, report }) => {
            info!(
                "Activated generation {} ({})",
                report.generation,
                if restored { "restored from storage" } else { "installed" }
            );
        }
        Err(e) => {
            warn!("Initial update check failed, passing requests through: {}", e);
        }
    }

    // Start periodic update checks
    if config.deployment.check_interval_secs > 0 {
        spawn_update_task(
            manager.clone(),
            source.clone(),
            config.deployment.check_interval_secs,
        );
    }

    // Create application state
    let state = AppState::new(manager, upstream, Some(source));

    // Create router
    let app = create_router(state, Some(Arc::new(metrics_handle)))
        .layer(TraceLayer::new_for_http());

    // Determine bind address
    let bind_addr = args.bind.unwrap_or(config.server.bind_address);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind_addr, port).parse()?;

    info!("Listening on {}", addr);
    info!("Upstream: {}", config.upstream.url);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
