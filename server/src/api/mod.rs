//! API module for the codetainer server
//!
//! Provides REST and WebSocket endpoints for:
//! - Image registration and codetainer lifecycle
//! - Terminal geometry and file management
//! - Interactive sessions (attach, send, detach)
//! - Health checks and metrics

mod error;
mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

pub use error::ApiError;
pub use handlers::health::mark_started;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        // Prometheus metrics (no auth for scraping)
        .route("/metrics", get(crate::metrics::metrics_handler))
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
}

/// API v1 routes
fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Image endpoints
        .route(
            "/image",
            get(handlers::images::list_images).post(handlers::images::register_image),
        )
        // Lifecycle endpoints
        .route(
            "/codetainer",
            get(handlers::codetainers::list_codetainers).post(handlers::codetainers::create_codetainer),
        )
        .route("/codetainer/:id/start", post(handlers::codetainers::start_codetainer))
        .route("/codetainer/:id/stop", post(handlers::codetainers::stop_codetainer))
        // Terminal endpoints
        .route(
            "/codetainer/:id/tty",
            get(handlers::tty::get_tty).post(handlers::tty::resize_tty),
        )
        // File endpoints
        .route(
            "/codetainer/:id/file",
            get(handlers::files::list_files).put(handlers::files::upload_file),
        )
        // Session endpoints
        .route("/codetainer/:id/send", post(handlers::session::send_command))
        .route(
            "/codetainer/:id/attach",
            get(handlers::session::attach).delete(handlers::session::detach),
        )
        .route("/session", get(handlers::session::list_sessions))
}
