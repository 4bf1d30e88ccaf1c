use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::models::api::{ErrorResponse, JobStatusResponse, RunResponse};
use crate::models::request::RunRequest;

/// POST /run: submit an image for 3D generation.
///
/// Always answers with a job ID; input that fails validation yields a job that
/// is already `FAILED`, so the error is observed on the first poll.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<RunRequest>,
) -> Json<RunResponse> {
    let job = state.jobs.submit(body.input);
    Json(RunResponse {
        id: job.id,
        status: job.status,
    })
}

/// GET /status/{id}: current status, plus output or error once terminal.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.jobs.status(&job_id) {
        Some(job) => Ok(Json(JobStatusResponse::from(&job))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Job {job_id} not found"),
            }),
        )),
    }
}
