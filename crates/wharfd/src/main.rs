//! wharfd - Wharf container sub-agent.
//!
//! Serves the guest and image RPC methods over HTTP, backed by Docker and
//! Open vSwitch.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wharf::{GuestManager, LifecycleConfig};
use wharf_image::{HttpImageSource, ImageManager, ImageServiceConfig};
use wharf_network::{PortProvisioner, ProcessRunner};
use wharf_runtime::{ContainerRuntime, DockerConfig, DockerRuntime};

mod api;
mod rpc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "WHARF_PORT", default_value_t = 30001)]
    port: u16,

    /// Docker endpoint
    #[arg(
        short,
        long,
        env = "WHARF_ENDPOINT",
        default_value = "unix:///var/run/docker.sock"
    )]
    endpoint: String,

    /// Directory with the Docker TLS certificates (ca.pem, cert.pem, key.pem)
    #[arg(short = 'd', long, env = "DOCKER_CERT_PATH")]
    docker_cert_path: Option<PathBuf>,

    /// Image service host; without a port, its SRV record or port 80 is used
    #[arg(
        short,
        long,
        env = "WHARF_IMAGE_SERVICE",
        default_value = "images.service.lochness.local"
    )]
    image_service: String,

    /// Log level, overridden by RUST_LOG
    #[arg(short, long, env = "WHARF_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Docker request timeout in seconds
    #[arg(long, env = "WHARF_RUNTIME_TIMEOUT", default_value_t = 120)]
    runtime_timeout: u64,

    /// Image service connect timeout in seconds
    #[arg(long, env = "WHARF_CONNECT_TIMEOUT", default_value_t = 10)]
    connect_timeout: u64,

    /// Switch command timeout in seconds
    #[arg(long, env = "WHARF_COMMAND_TIMEOUT", default_value_t = 30)]
    command_timeout: u64,

    /// Seconds a stopping guest gets before it is killed
    #[arg(long, env = "WHARF_STOP_GRACE", default_value_t = 10)]
    stop_grace: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        port = args.port,
        endpoint = %args.endpoint,
        cert_path = ?args.docker_cert_path,
        image_service = %args.image_service,
        "Configuration"
    );

    let mut docker = DockerConfig::default()
        .with_endpoint(&args.endpoint)
        .with_timeout(args.runtime_timeout);
    if let Some(path) = &args.docker_cert_path {
        docker = docker.with_tls(path);
    }
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(
        DockerRuntime::connect(&docker)
            .await
            .with_context(|| format!("failed to connect to docker at {}", args.endpoint))?,
    );

    let ports = PortProvisioner::new(Arc::new(ProcessRunner::new(Duration::from_secs(
        args.command_timeout,
    ))));
    let lifecycle = LifecycleConfig::default().with_stop_grace(Duration::from_secs(args.stop_grace));
    let guests = GuestManager::new(Arc::clone(&runtime), ports, lifecycle);

    let image_service = ImageServiceConfig::default()
        .with_host(&args.image_service)
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .resolve()
        .await
        .with_context(|| format!("failed to resolve image service {}", args.image_service))?;
    tracing::info!(image_service = %image_service.authority(), "Image service");
    let source =
        HttpImageSource::new(&image_service).context("failed to set up image service client")?;
    let images = ImageManager::new(Arc::clone(&runtime), Arc::new(source));

    let agent = Arc::new(rpc::Agent::new(runtime, guests, images));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("wharfd listening on {}", addr);

    axum::serve(listener, api::server::app(agent))
        .await
        .context("RPC server exited")?;

    Ok(())
}
