use serde::Deserialize;
use std::time::Duration;

/// Node configuration, read from the environment (and `.env` if present).
///
/// Storage and node-control credentials are optional: without them the node
/// still serves jobs, delivering results inline and never self-terminating.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Bearer token for the node-control API.
    pub runpod_api_key: Option<String>,

    /// Identifier of this node with the provider.
    pub runpod_pod_id: Option<String>,

    /// Base URL of the node-control API.
    #[serde(default = "default_runpod_api_base")]
    pub runpod_api_base: String,

    /// Object storage access key ID
    pub s3_access_key_id: Option<String>,

    /// Object storage secret access key
    pub s3_secret_access_key: Option<String>,

    /// Object storage bucket for generated assets
    pub s3_bucket_name: Option<String>,

    /// Endpoint override for S3-compatible stores (R2, B2, MinIO)
    pub s3_endpoint_url: Option<String>,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// Consecutive idle ticks (minutes at the default cadence) before shutdown.
    #[serde(default = "default_idle_threshold_minutes")]
    pub idle_threshold_minutes: u32,

    /// GPU memory use below this counts as idle.
    #[serde(default = "default_vram_idle_threshold_mb")]
    pub vram_idle_threshold_mb: u64,

    #[serde(default = "default_idle_tick_secs")]
    pub idle_tick_secs: u64,

    /// Upper bound on a single GPU telemetry read.
    #[serde(default = "default_telemetry_timeout_secs")]
    pub telemetry_timeout_secs: u64,

    /// Count ticks with a running job as busy regardless of GPU memory.
    #[serde(default = "default_true")]
    pub idle_suppress_during_jobs: bool,

    #[serde(default = "default_true")]
    pub watchdog_enabled: bool,

    /// Model identifier or path handed to the pipeline on first load.
    #[serde(default = "default_model_path")]
    pub model_path: String,

    /// Base URL of the local inference sidecar.
    #[serde(default = "default_pipeline_url")]
    pub pipeline_url: String,

    /// Load the model at startup instead of on the first job.
    #[serde(default = "default_true")]
    pub warmup_on_start: bool,

    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    /// How long finished jobs stay queryable.
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_runpod_api_base() -> String {
    "https://api.runpod.io/g6/stable-diffusion/v1".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_idle_threshold_minutes() -> u32 {
    30
}

fn default_vram_idle_threshold_mb() -> u64 {
    1000
}

fn default_idle_tick_secs() -> u64 {
    60
}

fn default_telemetry_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_model_path() -> String {
    "microsoft/TRELLIS.2-4B".to_string()
}

fn default_pipeline_url() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_max_image_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_job_retention_secs() -> u64 {
    3600
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Watchdog sampling period, at least one second.
    pub fn idle_tick(&self) -> Duration {
        Duration::from_secs(self.idle_tick_secs.max(1))
    }

    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_secs(self.telemetry_timeout_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}
