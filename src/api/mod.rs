//! Metrics HTTP surface.
//!
//! - `GET /metrics` - Prometheus text exposition of the probe counters
//! - `GET /healthz` - liveness

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::metrics::ProberMetrics;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

async fn get_metrics(State(metrics): State<Arc<ProberMetrics>>) -> Response {
    match metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

pub fn create_app(metrics: Arc<ProberMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/healthz", get(healthz))
        .with_state(metrics)
        .layer(TraceLayer::new_for_http())
}
