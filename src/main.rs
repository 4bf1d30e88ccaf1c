use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use gpu_asset_node::app_state::AppState;
use gpu_asset_node::config::AppConfig;
use gpu_asset_node::routes;
use gpu_asset_node::services::{
    delivery::DeliveryChain,
    generation::{JobService, JobWorker},
    jobs::{JobActivity, JobStore},
    model::ModelHandle,
    node::PodController,
    pipeline::InferenceServerLoader,
    queue::JobQueue,
    storage::{ObjectStore, StorageSettings},
    telemetry::NvidiaSmiTelemetry,
    watchdog::{IdleWatchdog, WatchdogConfig},
};

/// Headroom for the JSON envelope around a base64 image.
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing gpu-asset-node");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("generation_jobs_total", "Total generation jobs submitted");
    metrics::describe_counter!("generation_jobs_completed", "Total generation jobs completed");
    metrics::describe_counter!("generation_jobs_failed", "Total generation jobs that failed");
    metrics::describe_histogram!(
        "generation_processing_seconds",
        "Time from job start to terminal state"
    );
    metrics::describe_gauge!(
        "generation_queue_depth",
        "Current number of pending jobs in the queue"
    );
    metrics::describe_counter!(
        "asset_deliveries_total",
        "Delivered assets, labelled by delivery strategy"
    );
    metrics::describe_gauge!("watchdog_idle_ticks", "Consecutive idle watchdog ticks");
    metrics::describe_counter!(
        "watchdog_terminations_total",
        "Node termination requests issued by the idle watchdog"
    );

    // Object storage is optional; without it every asset is delivered inline
    let storage = match StorageSettings::from_config(&config) {
        Some(settings) => match ObjectStore::new(&settings) {
            Ok(store) => {
                tracing::info!(bucket = %settings.bucket, "Object storage configured");
                Some(Arc::new(store))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Invalid object storage configuration, delivering inline");
                None
            }
        },
        None => {
            tracing::warn!("Object storage not configured, delivering inline");
            None
        }
    };
    let storage_configured = storage.is_some();
    let delivery = Arc::new(DeliveryChain::standard(storage));
    tracing::info!(strategies = ?delivery.strategy_names(), "Delivery chain ready");

    // Generation model, loaded on first use (or now, when warm-up is enabled)
    let loader = InferenceServerLoader::new(&config.pipeline_url, &config.model_path)
        .expect("Failed to initialize pipeline loader");
    let model = Arc::new(ModelHandle::new(Arc::new(loader)));

    if config.warmup_on_start {
        let model = Arc::clone(&model);
        tokio::spawn(async move {
            if let Err(e) = model.get().await {
                tracing::warn!(error = %e, "Model warm-up failed, will retry on first job");
            }
        });
    }

    // Job pipeline: store, queue and the single worker
    let store = Arc::new(JobStore::new());
    let (queue, receiver) = JobQueue::new();
    let activity = JobActivity::default();

    let worker = JobWorker::new(
        Arc::clone(&store),
        Arc::clone(&model),
        delivery,
        activity.clone(),
        config.max_image_bytes,
    );
    tokio::spawn(worker.run(receiver));

    // Idle watchdog
    if config.watchdog_enabled {
        match PodController::new(
            &config.runpod_api_base,
            config.runpod_api_key.clone(),
            config.runpod_pod_id.clone(),
        ) {
            Ok(controller) => {
                let telemetry = NvidiaSmiTelemetry::new(config.telemetry_timeout());
                let mut watchdog = IdleWatchdog::new(
                    Arc::new(telemetry),
                    Arc::new(controller),
                    WatchdogConfig::from_app_config(&config),
                );
                if config.idle_suppress_during_jobs {
                    watchdog = watchdog.with_job_activity(activity.clone());
                }
                tokio::spawn(async move {
                    let exit = watchdog.run().await;
                    tracing::warn!(
                        idle_ticks = exit.idle_ticks,
                        acknowledged = exit.acknowledged,
                        "Idle watchdog finished"
                    );
                });
            }
            Err(e) => tracing::error!(error = %e, "Idle watchdog disabled"),
        }
    } else {
        tracing::info!("Idle watchdog disabled by configuration");
    }

    // Forget finished jobs after the retention window
    {
        let store = Arc::clone(&store);
        let retention = config.job_retention();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                let pruned = store.prune_finished(retention);
                if pruned > 0 {
                    tracing::debug!(pruned, "Pruned finished jobs");
                }
            }
        });
    }

    // Create shared application state
    let jobs = JobService::new(store, queue, config.max_image_bytes);
    let state = AppState::new(jobs, model, storage_configured);

    let body_limit = config.max_image_bytes.div_ceil(3) * 4 + BODY_OVERHEAD_BYTES;
    let app = routes::router(state, Some(prometheus_handle), body_limit);

    tracing::info!("Starting gpu-asset-node on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
