//! Monitoring endpoints
//!
//! - `/healthz` - Liveness: is the process alive?
//! - `/readyz` - Readiness: is the beat in the `running` state?
//! - `/metrics` - Prometheus metrics in text format

use crate::beater::lifecycle::Lifecycle;
use crate::server::metrics::SharedMetrics;
use crate::server::shutdown::ShutdownSignal;
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
struct ServerState {
    lifecycle: Lifecycle,
    metrics: SharedMetrics,
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// 200 while running, 503 while starting or shutting down
async fn readyz(State(state): State<ServerState>) -> impl IntoResponse {
    let lifecycle = state.lifecycle.state();
    let status = if state.lifecycle.is_running() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, lifecycle.as_str())
}

async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

fn build_router(lifecycle: Lifecycle, metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(self::metrics))
        .with_state(ServerState { lifecycle, metrics })
}

/// Serve the monitoring endpoints until `shutdown` fires
pub async fn run_health_server(
    host: &str,
    port: u16,
    lifecycle: Lifecycle,
    metrics: SharedMetrics,
    mut shutdown: ShutdownSignal,
) -> Result<(), std::io::Error> {
    let app = build_router(lifecycle, metrics);

    let listener = TcpListener::bind((host, port)).await?;
    info!(addr = %listener.local_addr()?, "Monitoring server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = shutdown.wait().await;
            info!(reason = %reason, "Monitoring server shutting down");
        })
        .await
}
