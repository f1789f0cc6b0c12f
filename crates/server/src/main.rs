use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidfetch_core::proxy::ProxyTokenStore;
use vidfetch_core::{
    create_authenticator, load_config, validate_config, Authenticator, CacheStore, DownloadDriver,
    FfmpegRunner, JobRegistry, JobService, MemoryCache, PlaylistResolver, QuotaManager,
    SegmentFetcher,
};

use vidfetch_server::api::create_router;
use vidfetch_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("VIDFETCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Auth method: {:?}", config.auth.method);
    info!("ffmpeg path: {}", config.transcoder.ffmpeg_path);

    // Create authenticator
    let authenticator: Arc<dyn Authenticator> = Arc::from(
        create_authenticator(&config.auth).context("Failed to create authenticator")?,
    );
    info!("Using authenticator: {}", authenticator.method_name());

    // Shared cache backing quota counters, proxy tokens and job snapshots
    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());

    // Job temp directories live under the registry temp root
    tokio::fs::create_dir_all(&config.registry.temp_root)
        .await
        .with_context(|| {
            format!(
                "Failed to create temp root {:?}",
                config.registry.temp_root
            )
        })?;

    let tokens = ProxyTokenStore::new(Arc::clone(&cache), config.proxy.clone());
    let driver = Arc::new(DownloadDriver::new(
        PlaylistResolver::new(config.resolver.clone()),
        SegmentFetcher::new(config.fetcher.clone()),
        FfmpegRunner::new(config.transcoder.clone()),
        tokens.clone(),
        config.transcoder.clone(),
    ));
    let registry = Arc::new(JobRegistry::new(
        Arc::clone(&cache),
        config.registry.clone(),
    ));
    let quota = QuotaManager::new(Arc::clone(&cache), config.quota.clone());
    let jobs = Arc::new(JobService::new(registry, driver, quota));
    info!("Job service initialized");

    // Create app state
    let app_state = Arc::new(AppState::new(config.clone(), authenticator, jobs, tokens));

    // Create router
    let app = create_router(app_state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
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
