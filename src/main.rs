//! DM Cache server
//!
//! Serves data manager entries through the cache over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dm_cache::{
    create_router, AppState, Config, ContentBackend, DmCache, MemoryChannel, MessageChannel,
    PublicApiBackend,
};

/// Main entry point for the cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the backend client, the optional in-process bus and the cache
/// 4. Create Axum router with all endpoints
/// 5. Start HTTP server on configured port
/// 6. Handle graceful shutdown on SIGINT/SIGTERM, then tear the cache down
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dm_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting DM Cache Server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: cache_size={}, ttl={:?}, port={}, backend={}",
        config.cache_size, config.time_to_live, config.server_port, config.data_manager_url
    );

    let backend: Arc<dyn ContentBackend> = Arc::new(PublicApiBackend::new(
        config.data_manager_url.clone(),
        config.data_manager_short_id.clone(),
    ));
    let bus = config.live_events.then(|| Arc::new(MemoryChannel::new()));
    let channel = bus
        .clone()
        .map(|bus| bus as Arc<dyn MessageChannel>);

    let cache = DmCache::new(config.cache_options(), backend, channel)
        .await
        .context("could not build the cache")?;
    info!(
        live_invalidation = cache.has_live_invalidation(),
        "Cache initialized"
    );

    let mut state = AppState::new(cache.clone(), config.data_manager_short_id.clone());
    if let Some(bus) = bus {
        state = state.with_bus(bus);
    }
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    cache.destroy().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
