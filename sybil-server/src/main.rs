use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use hf_hub::api::tokio::Api;
use sybil_core::{ArtifactStore, DeviceMap, FluxLoader, ImageService, DEFAULT_FLUX_REPO};
use tokio::{self, net::TcpListener};
use tracing_subscriber::EnvFilter;

mod error;
mod routes;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sybil avatar and banner generation server")]
struct Args {
    /// Host address to bind the server to
    #[arg(long, env = "SYBIL_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the server to
    #[arg(long, env = "SYBIL_PORT", default_value_t = 8100)]
    port: u16,

    /// Directory generated images are written to
    #[arg(long, env = "SYBIL_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Hugging Face repository holding the FLUX.1-schnell weights
    #[arg(long, env = "SYBIL_MODEL", default_value = DEFAULT_FLUX_REPO)]
    model: String,

    /// Use CPU instead of GPU
    #[arg(long, env = "SYBIL_CPU")]
    cpu: bool,

    /// Ordinal of the GPU to load the model on
    #[arg(long, env = "SYBIL_DEVICE_ORDINAL", default_value_t = 0)]
    device_ordinal: usize,

    /// Load the model at startup instead of on the first request
    #[arg(long, env = "SYBIL_PRELOAD")]
    preload: bool,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let store = ArtifactStore::open(&args.output_dir).await?;
    let loader = FluxLoader::new(Api::new()?, args.model.clone());
    let device_map = DeviceMap::new(args.cpu, args.device_ordinal);
    let service = Arc::new(ImageService::new(loader, device_map, store));

    if args.preload {
        // A failed preload is not fatal; the first request retries it.
        if let Err(e) = service.ensure_loaded().await {
            tracing::warn!(error = %e, "preload failed, will load on first request");
        }
    }

    let app = routes::router(service.clone());

    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        output_dir = %args.output_dir.display(),
        model = %args.model,
        "started server"
    );
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.unload().await;
    Ok(())
}
