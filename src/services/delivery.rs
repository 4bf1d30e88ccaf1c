//! Output delivery: how a finished asset becomes retrievable by the client.
//!
//! Strategies are tried in order and the first one that delivers wins.
//! A strategy that is not configured and one that fails both fall through to
//! the next; the difference only shows up in the logs.

use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;

use crate::models::job::JobResult;
use crate::services::storage::ObjectStore;

/// MIME type of exported GLB assets.
pub const GLB_CONTENT_TYPE: &str = "model/gltf-binary";

/// An exported asset waiting to be delivered.
#[derive(Debug, Clone)]
pub struct Asset {
    /// Object key / file name, e.g. `output_<job-id>.glb`.
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Asset {
    pub fn glb(job_id: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: format!("output_{job_id}.glb"),
            content_type: GLB_CONTENT_TYPE.to_string(),
            bytes,
        }
    }
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered(JobResult),
    NotConfigured,
    Failed(String),
}

#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, asset: &Asset) -> DeliveryOutcome;
}

/// Upload to object storage and hand back the object URL.
pub struct ObjectStorageDelivery {
    store: Option<Arc<ObjectStore>>,
}

impl ObjectStorageDelivery {
    /// `None` means storage is not configured; every attempt falls through.
    pub fn new(store: Option<Arc<ObjectStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DeliveryStrategy for ObjectStorageDelivery {
    fn name(&self) -> &'static str {
        "object_storage"
    }

    async fn deliver(&self, asset: &Asset) -> DeliveryOutcome {
        let Some(store) = &self.store else {
            return DeliveryOutcome::NotConfigured;
        };

        match store.upload(&asset.name, &asset.bytes, &asset.content_type).await {
            Ok(url) => DeliveryOutcome::Delivered(JobResult::url(url)),
            Err(e) => DeliveryOutcome::Failed(e.to_string()),
        }
    }
}

/// Embed the asset bytes in the status response as standard base64.
pub struct InlineDelivery;

#[async_trait]
impl DeliveryStrategy for InlineDelivery {
    fn name(&self) -> &'static str {
        "inline"
    }

    async fn deliver(&self, asset: &Asset) -> DeliveryOutcome {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&asset.bytes);
        DeliveryOutcome::Delivered(JobResult::inline(encoded))
    }
}

/// Ordered list of delivery strategies.
pub struct DeliveryChain {
    strategies: Vec<Box<dyn DeliveryStrategy>>,
}

impl DeliveryChain {
    pub fn new(strategies: Vec<Box<dyn DeliveryStrategy>>) -> Self {
        Self { strategies }
    }

    /// Object storage first, inline as the fallback.
    pub fn standard(store: Option<Arc<ObjectStore>>) -> Self {
        Self::new(vec![
            Box::new(ObjectStorageDelivery::new(store)),
            Box::new(InlineDelivery),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy in order until one delivers.
    pub async fn deliver(&self, asset: &Asset) -> Result<JobResult, DeliveryError> {
        let mut attempts = Vec::new();

        for strategy in &self.strategies {
            match strategy.deliver(asset).await {
                DeliveryOutcome::Delivered(result) => {
                    tracing::info!(
                        strategy = strategy.name(),
                        asset = %asset.name,
                        bytes = asset.bytes.len(),
                        "Asset delivered"
                    );
                    metrics::counter!("asset_deliveries_total", "strategy" => strategy.name())
                        .increment(1);
                    return Ok(result);
                }
                DeliveryOutcome::NotConfigured => {
                    tracing::info!(strategy = strategy.name(), "Delivery strategy not configured, skipping");
                }
                DeliveryOutcome::Failed(reason) => {
                    tracing::warn!(
                        strategy = strategy.name(),
                        error = %reason,
                        "Delivery strategy failed, falling back"
                    );
                    attempts.push(format!("{}: {}", strategy.name(), reason));
                }
            }
        }

        Err(DeliveryError::Exhausted(attempts.join("; ")))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("No delivery strategy succeeded: {0}")]
    Exhausted(String),
}
