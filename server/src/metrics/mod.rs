//! Prometheus metrics export
//!
//! Provides metrics endpoint for monitoring and alerting

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::AppState;

/// Prometheus metrics recorder
static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Safe to call more than once.
pub fn init_metrics() -> Result<()> {
    METRICS_HANDLE
        .get_or_try_init(|| {
            PrometheusBuilder::new()
                .set_buckets_for_metric(
                    Matcher::Full("codetainer_exec_duration_seconds".to_string()),
                    &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
                )?
                .install_recorder()
                .context("Failed to install Prometheus recorder")
        })
        .map(|_| ())
}

/// Record a one-shot exec
pub fn record_exec(duration_secs: f64, success: bool) {
    counter!("codetainer_execs_total").increment(1);
    if !success {
        counter!("codetainer_exec_failures_total").increment(1);
    }
    histogram!("codetainer_exec_duration_seconds").record(duration_secs);
}

/// Record a session attach
pub fn record_session_attached() {
    counter!("codetainer_sessions_attached_total").increment(1);
    gauge!("codetainer_active_sessions").increment(1.0);
}

/// Record a session ending for any reason
pub fn record_session_closed() {
    counter!("codetainer_sessions_closed_total").increment(1);
    gauge!("codetainer_active_sessions").decrement(1.0);
}

/// Record a lifecycle operation (create, start, stop)
pub fn record_lifecycle(operation: &'static str, success: bool) {
    let outcome = if success { "success" } else { "error" };
    counter!("codetainer_lifecycle_operations_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
}

/// Prometheus metrics endpoint handler
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(handle) = METRICS_HANDLE.get() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [("Content-Type", "text/plain")],
            "metrics disabled\n".to_string(),
        );
    };

    gauge!("codetainer_active_sessions").set(state.sessions.active_count().await as f64);

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        handle.render(),
    )
}
