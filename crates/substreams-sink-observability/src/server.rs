//! HTTP surface: Prometheus scrape endpoint and health probe.
//!
//! - `GET /metrics` → Prometheus text exposition
//! - `GET /health`  → `200 OK` once a data message was received,
//!   `503 no messages received yet` before that

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use crate::metrics::MetricsReader;

pub fn router(reader: MetricsReader) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(reader)
}

async fn metrics_handler(State(reader): State<MetricsReader>) -> String {
    reader.render()
}

async fn health_handler(State(reader): State<MetricsReader>) -> (StatusCode, &'static str) {
    if reader.has_messages() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "no messages received yet")
    }
}

/// Bind `addr` and serve until the task is dropped or the listener fails.
pub async fn serve(addr: &str, reader: MetricsReader) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "metrics endpoint listening");
    axum::serve(listener, router(reader)).await
}
