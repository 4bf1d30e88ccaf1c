pub mod health;
pub mod jobs;
pub mod metrics;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Build the HTTP API. `/metrics` is only mounted when a recorder handle is given.
///
/// `body_limit` bounds `POST /run` bodies, which carry base64 images.
pub fn router(state: AppState, prometheus: Option<Arc<PrometheusHandle>>, body_limit: usize) -> Router {
    let mut app = Router::new()
        .route("/health", get(health::health_check))
        .route("/run", post(jobs::submit_job))
        .route("/status/{id}", get(jobs::get_job_status))
        .with_state(state);

    if let Some(handle) = prometheus {
        app = app.route("/metrics", get(metrics::prometheus_metrics).with_state(handle));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(DefaultBodyLimit::max(body_limit))
}
