//! Test helpers: an in-process node backed by a fake generation pipeline

use async_trait::async_trait;
use axum::extract::State;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use gpu_asset_node::app_state::AppState;
use gpu_asset_node::routes;
use gpu_asset_node::services::{
    delivery::DeliveryChain,
    generation::{JobService, JobWorker},
    jobs::{JobActivity, JobStore},
    model::ModelHandle,
    pipeline::{ExportOptions, GeneratedMesh, GenerationParams, MeshPipeline, PipelineError, PipelineLoader},
    queue::JobQueue,
    storage::{ObjectStore, StorageSettings},
};

pub const MAX_IMAGE_BYTES: usize = 1024 * 1024;

/// Deterministic stand-in for the inference sidecar.
pub struct FakePipeline;

#[async_trait]
impl MeshPipeline for FakePipeline {
    async fn generate(&self, image: &[u8], params: &GenerationParams) -> Result<GeneratedMesh, PipelineError> {
        Ok(GeneratedMesh {
            mesh_id: format!("mesh-{}-{}", params.seed, image.len()),
            vertices: 8,
            faces: 12,
        })
    }

    async fn export_glb(&self, mesh: &GeneratedMesh, options: &ExportOptions) -> Result<Vec<u8>, PipelineError> {
        Ok(fake_glb(&mesh.mesh_id, options.texture_size))
    }
}

/// Bytes [`FakePipeline`] exports for a mesh.
pub fn fake_glb(mesh_id: &str, texture_size: u32) -> Vec<u8> {
    format!("glTF:{mesh_id}:{texture_size}").into_bytes()
}

pub struct FakeLoader {
    pub loads: AtomicUsize,
}

#[async_trait]
impl PipelineLoader for FakeLoader {
    async fn load(&self) -> Result<Arc<dyn MeshPipeline>, PipelineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakePipeline))
    }
}

pub struct TestNode {
    pub base_url: String,
    pub loader: Arc<FakeLoader>,
}

/// Storage settings pointing at a port nothing listens on.
pub fn unreachable_storage() -> StorageSettings {
    StorageSettings {
        bucket: "assets".to_string(),
        access_key: "test-access".to_string(),
        secret_key: "test-secret".to_string(),
        endpoint: Some("http://127.0.0.1:1".to_string()),
        region: "us-east-1".to_string(),
    }
}

/// Start the full HTTP stack and job worker on an ephemeral port.
pub async fn spawn_node(storage: Option<StorageSettings>) -> TestNode {
    let store = Arc::new(JobStore::new());
    let (queue, receiver) = JobQueue::new();

    let object_store = storage.map(|s| Arc::new(ObjectStore::new(&s).expect("valid storage settings")));
    let storage_configured = object_store.is_some();

    let loader = Arc::new(FakeLoader {
        loads: AtomicUsize::new(0),
    });
    let model = Arc::new(ModelHandle::new(loader.clone()));

    let worker = JobWorker::new(
        Arc::clone(&store),
        Arc::clone(&model),
        Arc::new(DeliveryChain::standard(object_store)),
        JobActivity::default(),
        MAX_IMAGE_BYTES,
    );
    tokio::spawn(worker.run(receiver));

    let jobs = JobService::new(store, queue, MAX_IMAGE_BYTES);
    let app = routes::router(AppState::new(jobs, model, storage_configured), None, MAX_IMAGE_BYTES * 2);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("test server") });

    TestNode {
        base_url: format!("http://{addr}"),
        loader,
    }
}

/// Serve `bytes` at `/input.png`, returning the full URL.
pub async fn serve_image(bytes: Vec<u8>) -> String {
    use axum::routing::get;

    let app = axum::Router::new().route("/input.png", get(move || async move { bytes.clone() }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind image listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("image server") });
    format!("http://{addr}/input.png")
}

/// In-memory S3-compatible bucket: stores PUT bodies and serves them on GET.
///
/// Returns settings that point [`spawn_node`] at it.
pub async fn spawn_object_store() -> StorageSettings {
    use axum::body::Bytes;
    use axum::http::{StatusCode, Uri};
    use axum::routing::get;
    use std::collections::HashMap;
    use std::sync::Mutex;

    let objects: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::default();
    let app = axum::Router::new()
        .route(
            "/{*path}",
            get(|State(objects): State<Arc<Mutex<HashMap<String, Vec<u8>>>>>, uri: Uri| async move {
                match objects.lock().expect("object map").get(uri.path()) {
                    Some(body) => (StatusCode::OK, body.clone()),
                    None => (StatusCode::NOT_FOUND, Vec::new()),
                }
            })
            .put(
                |State(objects): State<Arc<Mutex<HashMap<String, Vec<u8>>>>>, uri: Uri, body: Bytes| async move {
                    objects
                        .lock()
                        .expect("object map")
                        .insert(uri.path().to_string(), body.to_vec());
                    StatusCode::OK
                },
            ),
        )
        .with_state(objects);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind object store listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("object store") });

    StorageSettings {
        bucket: "assets".to_string(),
        access_key: "test-access".to_string(),
        secret_key: "test-secret".to_string(),
        endpoint: Some(format!("http://{addr}")),
        region: "us-east-1".to_string(),
    }
}
