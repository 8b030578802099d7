//! Render Core - HTTP server for the document-rendering engine
//!
//! Loads text documents, serves decoded pages and synthetic rasters, and
//! reports cache and scheduler statistics.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use render_core::api::{create_router, AppState};
use render_core::{EngineConfig, Event};

/// Main entry point for the render server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the engine (caches, scheduler, sweep tasks)
/// 4. Pre-spawn the minimum number of execution units
/// 5. Create Axum router with all endpoints
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM, then destroy the engine
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber with env filter
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "render_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Render Core Server");

    let config = EngineConfig::from_env();
    info!(
        "Configuration loaded: max_workers={}, task_timeout={:?}, max_retries={}, port={}, sweep_interval={:?}",
        config.scheduler.max_workers,
        config.scheduler.task_timeout,
        config.scheduler.max_retries,
        config.server_port,
        config.sweep_interval
    );

    let state = AppState::from_config(&config);
    let engine = state.engine.clone();
    let warmed = engine
        .scheduler()
        .pool()
        .warm_up()
        .await
        .context("failed to pre-spawn execution units")?;
    info!("Engine initialized with {} warm execution units", warmed);

    let event_log = engine
        .events()
        .attach(|event: &Event| debug!(?event, "Engine event"));

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    engine.destroy().await;
    event_log.abort();
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
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
