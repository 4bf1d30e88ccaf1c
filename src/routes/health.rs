use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model_loaded: bool,
    pub queue_depth: usize,
    pub storage_configured: bool,
    /// Jobs held in memory, by status.
    pub jobs: BTreeMap<String, usize>,
}

/// GET /health: liveness plus the node's serving state.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model_loaded: state.model.is_loaded(),
        queue_depth: state.jobs.queue_depth(),
        storage_configured: state.storage_configured,
        jobs: state
            .jobs
            .job_counts()
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect(),
    })
}
