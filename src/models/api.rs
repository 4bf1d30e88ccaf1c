use serde::{Deserialize, Serialize};

use crate::models::job::{DeliveryKind, Job, JobResult, JobStatus};

/// Response after submitting a generation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub id: String,
    pub status: JobStatus,
}

/// Output of a completed job. Exactly one field is set.
///
/// The `glb_*` aliases accept responses from older handlers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobOutput {
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "glb_url")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "glb_b64")]
    pub inline: Option<String>,
}

impl From<&JobResult> for JobOutput {
    fn from(result: &JobResult) -> Self {
        match result.delivery_kind {
            DeliveryKind::Url => JobOutput {
                url: Some(result.payload.clone()),
                inline: None,
            },
            DeliveryKind::Inline => JobOutput {
                url: None,
                inline: Some(result.payload.clone()),
            },
        }
    }
}

/// Response for `GET /status/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub id: String,
    pub status: JobStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JobOutput>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            output: job.result.as_ref().map(JobOutput::from),
            error: job.error.clone(),
        }
    }
}

/// Error body returned by the HTTP routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
