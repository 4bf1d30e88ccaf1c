use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::models::job::{Job, JobResult, JobStatus};
use crate::models::request::{ensure_decodable, GenerationInput, GenerationRequest, ImageSource, RequestError};
use crate::services::delivery::{Asset, DeliveryChain, DeliveryError};
use crate::services::jobs::{JobActivity, JobStore};
use crate::services::model::ModelHandle;
use crate::services::pipeline::{ExportOptions, GenerationParams, PipelineError};
use crate::services::queue::{JobQueue, QueueReceiver};

/// Accepts generation requests and answers status queries.
pub struct JobService {
    store: Arc<JobStore>,
    queue: JobQueue,
    max_image_bytes: usize,
}

impl JobService {
    pub fn new(store: Arc<JobStore>, queue: JobQueue, max_image_bytes: usize) -> Self {
        Self {
            store,
            queue,
            max_image_bytes,
        }
    }

    /// Create a job for `input`.
    ///
    /// Invalid input produces a job that is already `FAILED`; valid input is
    /// `QUEUED` and handed to the worker.
    pub fn submit(&self, input: GenerationInput) -> Job {
        metrics::counter!("generation_jobs_total").increment(1);

        let request = match input.into_request(self.max_image_bytes) {
            Ok(request) => request,
            Err(e) => {
                let job = self.store.create_rejected(&e.to_string());
                metrics::counter!("generation_jobs_failed").increment(1);
                tracing::info!(job_id = %job.id, error = %e, "Generation request rejected");
                return job;
            }
        };

        let job = self.store.create(request);
        if let Err(e) = self.queue.enqueue(&job.id) {
            tracing::error!(job_id = %job.id, error = %e, "Failed to enqueue job");
            metrics::counter!("generation_jobs_failed").increment(1);
            if let Err(e) = self.store.fail(&job.id, &e.to_string()) {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record enqueue failure");
            }
            return self.store.get(&job.id).unwrap_or(job);
        }

        tracing::info!(job_id = %job.id, queue_depth = self.queue.depth(), "Generation job queued");
        job
    }

    pub fn status(&self, job_id: &str) -> Option<Job> {
        self.store.get(job_id)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Jobs currently held, keyed by status.
    pub fn job_counts(&self) -> HashMap<JobStatus, usize> {
        self.store.status_counts()
    }
}

/// Runs queued jobs one at a time: pipeline, export, delivery.
pub struct JobWorker {
    store: Arc<JobStore>,
    model: Arc<ModelHandle>,
    delivery: Arc<DeliveryChain>,
    activity: JobActivity,
    http: reqwest::Client,
    max_image_bytes: usize,
}

impl JobWorker {
    pub fn new(
        store: Arc<JobStore>,
        model: Arc<ModelHandle>,
        delivery: Arc<DeliveryChain>,
        activity: JobActivity,
        max_image_bytes: usize,
    ) -> Self {
        Self {
            store,
            model,
            delivery,
            activity,
            http: reqwest::Client::new(),
            max_image_bytes,
        }
    }

    /// Drain the queue until every [`JobQueue`] handle is dropped.
    pub async fn run(self, mut receiver: QueueReceiver) {
        tracing::info!("Job worker ready");
        while let Some(job_id) = receiver.next().await {
            self.process(&job_id).await;
        }
        tracing::info!("Job queue closed, worker exiting");
    }

    /// Execute one job to a terminal state.
    pub async fn process(&self, job_id: &str) {
        let Some(request) = self.store.get(job_id).and_then(|job| job.request) else {
            tracing::warn!(job_id, "Dequeued job has no runnable request, skipping");
            return;
        };

        // Held before RUNNING is visible: a RUNNING job always reads as busy.
        let _running = self.activity.begin();
        if let Err(e) = self.store.mark_running(job_id) {
            tracing::error!(job_id, error = %e, "Failed to start job");
            return;
        }
        tracing::info!(job_id, seed = request.seed, "Processing generation job");

        let start = Instant::now();
        let outcome = self.execute(job_id, &request).await;
        metrics::histogram!("generation_processing_seconds").record(start.elapsed().as_secs_f64());

        match outcome {
            Ok(result) => {
                let kind = result.delivery_kind;
                match self.store.complete(job_id, result) {
                    Ok(()) => {
                        metrics::counter!("generation_jobs_completed").increment(1);
                        tracing::info!(
                            job_id,
                            delivery = %kind,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Job completed successfully"
                        );
                    }
                    Err(e) => tracing::error!(job_id, error = %e, "Failed to store job result"),
                }
            }
            Err(e) => {
                metrics::counter!("generation_jobs_failed").increment(1);
                tracing::error!(job_id, error = %e, "Job processing failed");
                if let Err(e) = self.store.fail(job_id, &e.to_string()) {
                    tracing::error!(job_id, error = %e, "Failed to store job error");
                }
            }
        }
    }

    async fn execute(&self, job_id: &str, request: &GenerationRequest) -> Result<JobResult, ExecutionError> {
        let image = self.resolve_image(&request.image).await?;

        let pipeline = self.model.get().await?;

        tracing::debug!(job_id, "Generating mesh");
        let mesh = pipeline
            .generate(&image, &GenerationParams::from(request))
            .await?;

        tracing::debug!(job_id, mesh_id = %mesh.mesh_id, faces = mesh.faces, "Exporting GLB");
        let options = ExportOptions::with_texture_size(request.texture_resolution.pixels());
        let glb = pipeline.export_glb(&mesh, &options).await?;

        let asset = Asset::glb(job_id, glb);
        Ok(self.delivery.deliver(&asset).await?)
    }

    async fn resolve_image(&self, source: &ImageSource) -> Result<Vec<u8>, ExecutionError> {
        let bytes = match source {
            ImageSource::Bytes(bytes) => return Ok(bytes.clone()),
            ImageSource::Url(url) => {
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(ExecutionError::ImageFetch)?;
                response.bytes().await.map_err(ExecutionError::ImageFetch)?
            }
        };

        if bytes.len() > self.max_image_bytes {
            return Err(RequestError::ImageTooLarge {
                size: bytes.len(),
                limit: self.max_image_bytes,
            }
            .into());
        }
        ensure_decodable(&bytes)?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Failed to fetch input image: {0}")]
    ImageFetch(reqwest::Error),

    #[error(transparent)]
    Input(#[from] RequestError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}
