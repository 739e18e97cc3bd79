//! HTTP sidecar using Axum.
//!
//! Carries no bridge logic: it only exposes health, metrics and the
//! operation description next to a running bridge server.

use crate::handler::{handle_health, handle_metrics, handle_operations};
use axum::{routing::get, Router};
use secure_bridge::PrometheusMetrics;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    pub metrics: PrometheusMetrics,
    /// Served verbatim at `/operations`.
    pub operations: Value,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/operations", get(handle_operations))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP sidecar in the background.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(state: AppState, host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let app = router(Arc::new(state));

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP sidecar listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "HTTP sidecar stopped");
        }
    });

    Ok(actual_addr)
}
