use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::services::pipeline::{MeshPipeline, PipelineError, PipelineLoader};

/// Lazily loaded, process-lifetime pipeline.
///
/// The first caller loads the model; concurrent callers wait for that load
/// instead of starting their own. A failed load leaves the handle empty so the
/// next job tries again.
pub struct ModelHandle {
    loader: Arc<dyn PipelineLoader>,
    pipeline: OnceCell<Arc<dyn MeshPipeline>>,
}

impl ModelHandle {
    pub fn new(loader: Arc<dyn PipelineLoader>) -> Self {
        Self {
            loader,
            pipeline: OnceCell::new(),
        }
    }

    /// Return the loaded pipeline, loading it on first use.
    pub async fn get(&self) -> Result<Arc<dyn MeshPipeline>, PipelineError> {
        let pipeline = self
            .pipeline
            .get_or_try_init(|| async {
                let start = std::time::Instant::now();
                let pipeline = self.loader.load().await?;
                tracing::info!(load_ms = start.elapsed().as_millis() as u64, "Generation model loaded");
                Ok::<_, PipelineError>(pipeline)
            })
            .await?;
        Ok(Arc::clone(pipeline))
    }

    pub fn is_loaded(&self) -> bool {
        self.pipeline.initialized()
    }
}
