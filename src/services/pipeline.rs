use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::models::request::GenerationRequest;

/// Rasterizer face limit; meshes are simplified below this before export.
pub const MAX_FACES: u64 = 16_777_216;

/// Target face count after decimation during export.
pub const DECIMATION_TARGET: u64 = 1_000_000;

/// Sampler settings for one generation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationParams {
    pub seed: u32,
    pub structural_guidance_scale: f32,
    pub structural_steps: u32,
    pub detail_guidance_scale: f32,
    pub detail_steps: u32,
}

impl From<&GenerationRequest> for GenerationParams {
    fn from(request: &GenerationRequest) -> Self {
        Self {
            seed: request.seed,
            structural_guidance_scale: request.structural_guidance_scale,
            structural_steps: request.structural_steps,
            detail_guidance_scale: request.detail_guidance_scale,
            detail_steps: request.detail_steps,
        }
    }
}

/// Mesh post-processing and GLB export settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportOptions {
    pub texture_size: u32,
    pub decimation_target: u64,
    pub simplify_target: u64,
    pub remesh: bool,
    pub remesh_band: u32,
    pub remesh_project: u32,
    pub webp_textures: bool,
}

impl ExportOptions {
    pub fn with_texture_size(texture_size: u32) -> Self {
        Self {
            texture_size,
            decimation_target: DECIMATION_TARGET,
            simplify_target: MAX_FACES,
            remesh: true,
            remesh_band: 1,
            remesh_project: 0,
            webp_textures: true,
        }
    }
}

/// A mesh held by the pipeline, referenced until it is exported.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeneratedMesh {
    pub mesh_id: String,
    #[serde(default)]
    pub vertices: u64,
    #[serde(default)]
    pub faces: u64,
}

/// Image-to-3D pipeline. Treated as opaque: image in, mesh out.
#[async_trait]
pub trait MeshPipeline: Send + Sync {
    async fn generate(&self, image: &[u8], params: &GenerationParams) -> Result<GeneratedMesh, PipelineError>;

    /// Export a generated mesh to binary glTF.
    async fn export_glb(&self, mesh: &GeneratedMesh, options: &ExportOptions) -> Result<Vec<u8>, PipelineError>;
}

/// Loads the model weights and returns a ready pipeline.
#[async_trait]
pub trait PipelineLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn MeshPipeline>, PipelineError>;
}

/// Loader for a model served by a local inference sidecar over HTTP.
pub struct InferenceServerLoader {
    http: Client,
    base_url: String,
    model_path: String,
}

impl InferenceServerLoader {
    pub fn new(base_url: &str, model_path: &str) -> Result<Self, PipelineError> {
        // Generation can take minutes on large textures.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30 * 60))
            .build()
            .map_err(PipelineError::Http)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model_path: model_path.to_string(),
        })
    }
}

#[derive(Serialize)]
struct LoadRequest<'a> {
    model_path: &'a str,
}

#[async_trait]
impl PipelineLoader for InferenceServerLoader {
    async fn load(&self) -> Result<Arc<dyn MeshPipeline>, PipelineError> {
        tracing::info!(model_path = %self.model_path, "Loading generation model");

        let response = self
            .http
            .post(format!("{}/load", self.base_url))
            .json(&LoadRequest {
                model_path: &self.model_path,
            })
            .send()
            .await
            .map_err(PipelineError::Http)?;
        check_status(response).await.map_err(|e| PipelineError::Load(e.to_string()))?;

        Ok(Arc::new(InferenceServerPipeline {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
        }))
    }
}

/// Pipeline calls against the inference sidecar.
pub struct InferenceServerPipeline {
    http: Client,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    image: String,
    #[serde(flatten)]
    params: &'a GenerationParams,
}

#[derive(Serialize)]
struct ExportRequest<'a> {
    mesh_id: &'a str,
    #[serde(flatten)]
    options: &'a ExportOptions,
}

#[async_trait]
impl MeshPipeline for InferenceServerPipeline {
    async fn generate(&self, image: &[u8], params: &GenerationParams) -> Result<GeneratedMesh, PipelineError> {
        let body = GenerateRequest {
            image: base64::engine::general_purpose::STANDARD.encode(image),
            params,
        };

        let response = self
            .http
            .post(format!("{}/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(PipelineError::Http)?;

        check_status(response)
            .await?
            .json::<GeneratedMesh>()
            .await
            .map_err(PipelineError::Http)
    }

    async fn export_glb(&self, mesh: &GeneratedMesh, options: &ExportOptions) -> Result<Vec<u8>, PipelineError> {
        let response = self
            .http
            .post(format!("{}/export", self.base_url))
            .json(&ExportRequest {
                mesh_id: &mesh.mesh_id,
                options,
            })
            .send()
            .await
            .map_err(PipelineError::Http)?;

        let bytes = check_status(response)
            .await?
            .bytes()
            .await
            .map_err(PipelineError::Http)?;

        if bytes.is_empty() {
            return Err(PipelineError::Export("empty GLB returned".to_string()));
        }
        Ok(bytes.to_vec())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PipelineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PipelineError::Status {
        status: status.as_u16(),
        body,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Model load failed: {0}")]
    Load(String),

    #[error("Inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inference server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Mesh export failed: {0}")]
    Export(String),
}
