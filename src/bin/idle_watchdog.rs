//! Standalone idle watchdog, for nodes whose job server runs out of process.
//!
//! Without job-activity information it relies on GPU memory alone.

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use gpu_asset_node::config::AppConfig;
use gpu_asset_node::services::{
    node::PodController,
    telemetry::NvidiaSmiTelemetry,
    watchdog::{IdleWatchdog, WatchdogConfig},
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration");

    let controller = PodController::new(
        &config.runpod_api_base,
        config.runpod_api_key.clone(),
        config.runpod_pod_id.clone(),
    )
    .expect("Failed to initialize node controller");

    let watchdog = IdleWatchdog::new(
        Arc::new(NvidiaSmiTelemetry::new(config.telemetry_timeout())),
        Arc::new(controller),
        WatchdogConfig::from_app_config(&config),
    );

    let exit = watchdog.run().await;

    if exit.acknowledged {
        tracing::info!(idle_ticks = exit.idle_ticks, "Termination requested, exiting");
    } else {
        tracing::error!(idle_ticks = exit.idle_ticks, "Termination request was not acknowledged");
        std::process::exit(1);
    }
}
