//! Codetainer server - container-backed terminals for remote clients
//!
//! This is the main entry point for the codetainer service.
//! It talks to the container engine and serves the REST and WebSocket API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::HeaderName;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use codetainer::api::{create_router, mark_started};
use codetainer::config::AppConfig;
use codetainer::logging::init_logging;
use codetainer::runtime::{ContainerRuntime, DockerRuntime};
use codetainer::store::JsonStore;
use codetainer::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    mark_started();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    init_logging(&config.log_level, &config.log_dir)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting codetainer server"
    );

    // Initialize metrics system
    if config.metrics.enabled {
        codetainer::metrics::init_metrics()?;
        info!("Prometheus metrics initialized");
    }

    // Connect to the container engine
    let runtime = Arc::new(DockerRuntime::connect(&config.runtime)?);
    match runtime.version().await {
        Ok(version) => info!(engine_version = %version, "Container engine reachable"),
        Err(e) => warn!(error = %e, "Container engine not reachable yet"),
    }

    // Open the metadata store
    let store = Arc::new(
        JsonStore::open(&config.data_dir)
            .await
            .context("Failed to open codetainer database")?,
    );

    // Create shared application state
    let state = Arc::new(AppState::new(config.clone(), runtime, store));

    // Build the router with all routes and middleware
    let x_request_id = HeaderName::from_static("x-request-id");
    let app = create_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Bind to address
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(%addr, "Listening on");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");

    // Release every interactive exec before exiting
    state.sessions.detach_all().await;

    info!("Codetainer server stopped");
    Ok(())
}

/// Handle shutdown signals gracefully
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
