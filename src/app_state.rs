use std::sync::Arc;

use crate::services::{generation::JobService, model::ModelHandle};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobService>,
    pub model: Arc<ModelHandle>,
    pub storage_configured: bool,
}

impl AppState {
    pub fn new(jobs: JobService, model: Arc<ModelHandle>, storage_configured: bool) -> Self {
        Self {
            jobs: Arc::new(jobs),
            model,
            storage_configured,
        }
    }
}
