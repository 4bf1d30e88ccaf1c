//! Client for the node's job protocol: submit, poll until terminal, fetch.

use base64::Engine;
use reqwest::Client;
use std::time::{Duration, Instant};

use crate::models::api::{JobOutput, JobStatusResponse, RunResponse};
use crate::models::job::{DeliveryKind, JobStatus};
use crate::models::request::{GenerationInput, RunRequest};

/// Default time between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A generated asset materialized on the client side.
#[derive(Debug, Clone)]
pub struct GeneratedAsset {
    pub job_id: String,
    pub delivery: DeliveryKind,
    pub bytes: Vec<u8>,
}

pub struct NodeClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl NodeClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }

    /// Send `Authorization: Bearer <key>` with every job request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Give up polling after `timeout`. Polling is unbounded by default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// POST /run, returning the job ID.
    pub async fn submit(&self, input: &GenerationInput) -> Result<String, ClientError> {
        let response = self
            .authorized(self.http.post(format!("{}/run", self.base_url)))
            .json(&RunRequest { input: input.clone() })
            .send()
            .await?;

        let body: RunResponse = check_status(response).await?.json().await?;
        if body.id.is_empty() {
            return Err(ClientError::MissingJobId);
        }
        Ok(body.id)
    }

    /// GET /status/{id}
    pub async fn status(&self, job_id: &str) -> Result<JobStatusResponse, ClientError> {
        let response = self
            .authorized(self.http.get(format!("{}/status/{}", self.base_url, job_id)))
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Poll until the job is `COMPLETED` or `FAILED`.
    pub async fn wait_for_completion(&self, job_id: &str) -> Result<JobStatusResponse, ClientError> {
        let start = Instant::now();
        let mut last_seen: Option<JobStatus> = None;

        loop {
            let status = self.status(job_id).await?;

            if last_seen != Some(status.status) {
                tracing::info!(job_id, status = %status.status, "Job status changed");
                last_seen = Some(status.status);
            }

            if status.status.is_terminal() {
                return Ok(status);
            }

            if let Some(timeout) = self.timeout {
                if start.elapsed() + self.poll_interval > timeout {
                    return Err(ClientError::TimedOut {
                        job_id: job_id.to_string(),
                        waited: start.elapsed(),
                    });
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Turn a completed job's output into asset bytes.
    ///
    /// URL outputs are downloaded; inline outputs are base64-decoded.
    pub async fn fetch_asset(&self, output: &JobOutput) -> Result<(DeliveryKind, Vec<u8>), ClientError> {
        if let Some(url) = &output.url {
            let response = self.http.get(url).send().await?;
            let bytes = check_status(response).await?.bytes().await?;
            return Ok((DeliveryKind::Url, bytes.to_vec()));
        }

        if let Some(encoded) = &output.inline {
            let bytes = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
            return Ok((DeliveryKind::Inline, bytes));
        }

        Err(ClientError::EmptyOutput)
    }

    /// Submit, wait and fetch in one call.
    ///
    /// A failed job surfaces its error message verbatim and is not retried.
    pub async fn generate(&self, input: &GenerationInput) -> Result<GeneratedAsset, ClientError> {
        let job_id = self.submit(input).await?;
        tracing::info!(job_id = %job_id, "Generation job submitted");

        let status = self.wait_for_completion(&job_id).await?;
        if status.status == JobStatus::Failed {
            return Err(ClientError::JobFailed(
                status.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        let output = status.output.ok_or(ClientError::EmptyOutput)?;
        let (delivery, bytes) = self.fetch_asset(&output).await?;

        Ok(GeneratedAsset {
            job_id,
            delivery,
            bytes,
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Api {
        status: status.as_u16(),
        body,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Node returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Submission response did not contain a job ID")]
    MissingJobId,

    #[error("{0}")]
    JobFailed(String),

    #[error("Completed job has no output")]
    EmptyOutput,

    #[error("Inline output is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Job {job_id} not finished after {waited:?}")]
    TimedOut { job_id: String, waited: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serves a scripted status sequence for job "j1" and a static asset.
    async fn scripted_node(statuses: Vec<serde_json::Value>) -> (String, Arc<AtomicUsize>) {
        let polls = Arc::new(AtomicUsize::new(0));
        let state = (Arc::new(statuses), Arc::clone(&polls));
        let app = Router::new()
            .route(
                "/status/{id}",
                get(
                    |State((statuses, polls)): State<(Arc<Vec<serde_json::Value>>, Arc<AtomicUsize>)>,
                     Path(_id): Path<String>| async move {
                        let n = polls.fetch_add(1, Ordering::SeqCst);
                        Json(statuses[n.min(statuses.len() - 1)].clone())
                    },
                ),
            )
            .route("/assets/model.glb", get(|| async { b"glTF-from-url".to_vec() }))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), polls)
    }

    fn fast(base: &str) -> NodeClient {
        NodeClient::new(base).with_poll_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_polls_until_terminal() {
        let (base, polls) = scripted_node(vec![
            serde_json::json!({"id": "j1", "status": "QUEUED"}),
            serde_json::json!({"id": "j1", "status": "RUNNING"}),
            serde_json::json!({"id": "j1", "status": "RUNNING"}),
            serde_json::json!({"id": "j1", "status": "COMPLETED", "output": {"inline": "AQID"}}),
        ])
        .await;

        let status = fast(&base).wait_for_completion("j1").await.unwrap();

        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_url_and_inline_yield_same_bytes() {
        let (base, _) = scripted_node(vec![serde_json::json!({"id": "j1", "status": "QUEUED"})]).await;
        let client = fast(&base);

        let (kind, from_url) = client
            .fetch_asset(&JobOutput {
                url: Some(format!("{base}/assets/model.glb")),
                inline: None,
            })
            .await
            .unwrap();
        assert_eq!(kind, DeliveryKind::Url);

        let (kind, from_inline) = client
            .fetch_asset(&JobOutput {
                url: None,
                inline: Some(base64::engine::general_purpose::STANDARD.encode(b"glTF-from-url")),
            })
            .await
            .unwrap();
        assert_eq!(kind, DeliveryKind::Inline);
        assert_eq!(from_url, from_inline);
    }

    #[tokio::test]
    async fn test_empty_output_is_an_error() {
        let client = NodeClient::new("http://127.0.0.1:1");
        assert!(matches!(
            client.fetch_asset(&JobOutput::default()).await,
            Err(ClientError::EmptyOutput)
        ));
    }

    #[tokio::test]
    async fn test_timeout_when_configured() {
        let (base, _) = scripted_node(vec![serde_json::json!({"id": "j1", "status": "RUNNING"})]).await;

        let err = fast(&base)
            .with_timeout(Duration::from_millis(50))
            .wait_for_completion("j1")
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::TimedOut { .. }));
    }

    #[test]
    fn test_legacy_response_shape_accepted() {
        let status: JobStatusResponse = serde_json::from_str(
            r#"{"id":"x","status":"IN_PROGRESS"}"#,
        )
        .unwrap();
        assert_eq!(status.status, JobStatus::Running);

        let status: JobStatusResponse = serde_json::from_str(
            r#"{"id":"x","status":"COMPLETED","output":{"glb_url":"https://b/x.glb"}}"#,
        )
        .unwrap();
        assert_eq!(status.output.unwrap().url.as_deref(), Some("https://b/x.glb"));
    }
}
