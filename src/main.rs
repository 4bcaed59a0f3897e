//! Kapital Cache admin server
//!
//! Builds the process-wide cache service and serves its administrative API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kapital_cache::cache::{
    Backend, CacheService, MemoryBackend, RedisBackend, SharedClock, Store, SystemClock,
};
use kapital_cache::config::{BackendKind, Config};
use kapital_cache::{create_router, AppState};

/// Main entry point for the cache admin server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Connect the backing store (a down Redis only disables caching)
/// 4. Build the store and the shared cache service
/// 5. Start HTTP server on configured port
/// 6. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kapital_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Kapital cache server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: backend={:?}, redis={}:{}/{}, key_prefix={}, port={}",
        config.backend,
        config.redis.host,
        config.redis.port,
        config.redis.db,
        config.key_prefix,
        config.server_port
    );

    let clock: SharedClock = Arc::new(SystemClock);
    let backend: Arc<dyn Backend> = match config.backend {
        BackendKind::Redis => Arc::new(
            RedisBackend::connect(&config.redis)
                .await
                .context("invalid Redis configuration")?,
        ),
        BackendKind::Memory => Arc::new(MemoryBackend::new(clock.clone())),
    };

    let store = Arc::new(Store::new(
        backend,
        config.breaker.clone(),
        config.reconnect.clone(),
        clock,
    ));
    let cache = Arc::new(CacheService::new(store, config.scan_limit));

    let health = cache.health().await;
    if health.status == "connected" {
        info!("Caching enabled");
    } else {
        warn!("Cache backend unavailable, serving uncached until it reconnects");
    }

    let app = create_router(AppState::new(cache));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
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
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
