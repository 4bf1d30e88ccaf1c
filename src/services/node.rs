use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Remote control over the node this process runs on.
///
/// `terminate` is a single best-effort command: callers invoke it at most
/// once and do not retry it.
#[async_trait]
pub trait NodeController: Send + Sync {
    async fn terminate(&self) -> Result<(), NodeError>;
}

/// Terminates a pod through the provider's REST API.
pub struct PodController {
    http: Client,
    api_base: String,
    api_key: Option<String>,
    pod_id: Option<String>,
}

impl PodController {
    pub fn new(api_base: &str, api_key: Option<String>, pod_id: Option<String>) -> Result<Self, NodeError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(NodeError::Http)?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            pod_id,
        })
    }

    fn terminate_endpoint(&self, pod_id: &str) -> String {
        format!("{}/pods/{}/terminate", self.api_base, pod_id)
    }
}

#[async_trait]
impl NodeController for PodController {
    async fn terminate(&self) -> Result<(), NodeError> {
        let (Some(api_key), Some(pod_id)) = (self.api_key.as_deref(), self.pod_id.as_deref()) else {
            return Err(NodeError::NotConfigured);
        };

        let url = self.terminate_endpoint(pod_id);
        tracing::info!(pod_id, %url, "Requesting node termination");

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(NodeError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NodeError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Node control API key or pod ID not configured")]
    NotConfigured,

    #[error("Node control request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Node control API returned {status}: {body}")]
    Rejected { status: u16, body: String },
}
