//! Zarr API server binary.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use zarr_api::{app, metrics, AppState, ServiceConfig};

#[derive(Parser, Debug)]
#[command(name = "zarr-api")]
#[command(about = "Zarr v2 / OME-NGFF gateway for microscopy images")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "ZARR_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides the configuration file)
    #[arg(short, long, env = "ZARR_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,

    /// Number of tokio worker threads (default: number of CPU cores)
    #[arg(long, env = "TOKIO_WORKER_THREADS")]
    worker_threads: Option<usize>,
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let threads = args.worker_threads.unwrap_or_else(num_cpus::get);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .enable_all()
        .build()?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let prometheus_handle = metrics::install_prometheus()?;
    info!("Prometheus metrics exporter initialized");

    let mut config = ServiceConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    info!(
        backend = config.backend.name(),
        prefix = %config.path_prefix,
        cache_size_mb = config.zarr.cache_size_mb,
        worker_pool_size = config.zarr.worker_pool_size,
        compressor = %config.zarr.compressor,
        "Starting Zarr API server"
    );

    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.listen))?;

    let state = Arc::new(AppState::new(config).await?.with_prometheus(prometheus_handle));

    info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}
