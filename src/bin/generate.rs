//! Submit an image to a generation node and save the resulting GLB.

use base64::Engine;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use gpu_asset_node::client::NodeClient;
use gpu_asset_node::models::request::{GenerationInput, TextureResolution};

#[derive(Debug, Parser)]
#[command(name = "generate", about = "Generate a 3D asset from an image on a GPU node")]
struct Args {
    /// Local image file, or an http(s) URL the node can fetch.
    image: String,

    /// Base URL of the node (or serverless endpoint).
    #[arg(long, env = "GENERATE_ENDPOINT")]
    endpoint: String,

    /// Bearer token for the endpoint.
    #[arg(long, env = "RUNPOD_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Where to write the GLB.
    #[arg(short, long, default_value = "latest_output.glb")]
    output: PathBuf,

    /// Fixed seed; random when omitted.
    #[arg(long)]
    seed: Option<i64>,

    #[arg(long, default_value = "7.5")]
    structural_guidance_scale: f32,

    #[arg(long, default_value = "12")]
    structural_steps: u32,

    #[arg(long, default_value = "3.0")]
    detail_guidance_scale: f32,

    #[arg(long, default_value = "12")]
    detail_steps: u32,

    /// Texture edge length: 1024, 2048 or 4096.
    #[arg(long, default_value = "2048", value_parser = parse_texture_resolution)]
    texture_resolution: TextureResolution,

    /// Seconds between status polls.
    #[arg(long, default_value = "2")]
    poll_secs: u64,

    /// Give up after this many seconds. Waits indefinitely when omitted.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn parse_texture_resolution(s: &str) -> Result<TextureResolution, String> {
    let value: u32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    TextureResolution::try_from(value).map_err(|e| e.to_string())
}

/// URLs pass through; local files are sent as base64.
fn image_source(image: &str) -> Result<String, std::io::Error> {
    if image.starts_with("http://") || image.starts_with("https://") {
        return Ok(image.to_string());
    }
    let bytes = std::fs::read(image)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let image = match image_source(&args.image) {
        Ok(image) => image,
        Err(e) => {
            tracing::error!(path = %args.image, error = %e, "Failed to read image");
            return ExitCode::FAILURE;
        }
    };

    let input = GenerationInput {
        seed: args.seed,
        structural_guidance_scale: args.structural_guidance_scale,
        structural_steps: args.structural_steps,
        detail_guidance_scale: args.detail_guidance_scale,
        detail_steps: args.detail_steps,
        texture_resolution: args.texture_resolution.pixels(),
        ..GenerationInput::new(image)
    };

    let mut client = NodeClient::new(&args.endpoint).with_poll_interval(Duration::from_secs(args.poll_secs));
    if let Some(key) = args.api_key {
        client = client.with_api_key(key);
    }
    if let Some(secs) = args.timeout_secs {
        client = client.with_timeout(Duration::from_secs(secs));
    }

    let asset = match client.generate(&input).await {
        Ok(asset) => asset,
        Err(e) => {
            tracing::error!(error = %e, "Generation failed");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = std::fs::write(&args.output, &asset.bytes) {
        tracing::error!(path = %args.output.display(), error = %e, "Failed to write asset");
        return ExitCode::FAILURE;
    }

    tracing::info!(
        job_id = %asset.job_id,
        delivery = ?asset.delivery,
        bytes = asset.bytes.len(),
        path = %args.output.display(),
        "Asset saved"
    );
    ExitCode::SUCCESS
}
