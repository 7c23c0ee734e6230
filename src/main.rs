//! Driver entry point: parse configuration, build the Cloud.dk backend, and
//! serve the CSI services on the configured Unix socket.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use clouddk_csi::config::{
    default_csi_endpoint, Configuration, DEFAULT_API_ENDPOINT, DEFAULT_SERVER_MEMORY,
    DEFAULT_SERVER_PROCESSORS,
};
use clouddk_csi::transport::CsiServer;
use clouddk_csi::{CloudDkBackend, CsiError, DRIVER_NAME, DRIVER_VERSION};

/// CSI driver for Cloud.dk network storage.
///
/// Every flag mirrors a `CLOUDDK_*` environment variable; flags take
/// precedence.
#[derive(Debug, Parser)]
#[command(name = "clouddk-csi", version = DRIVER_VERSION, about)]
struct Args {
    /// The API endpoint.
    #[arg(long, env = "CLOUDDK_API_ENDPOINT", default_value = DEFAULT_API_ENDPOINT)]
    api_endpoint: String,

    /// The API key.
    #[arg(long, env = "CLOUDDK_API_KEY")]
    api_key: String,

    /// The CSI endpoint.
    #[arg(long, env = "CLOUDDK_CSI_ENDPOINT", default_value_t = default_csi_endpoint())]
    csi_endpoint: String,

    /// The node id.
    #[arg(long, env = "CLOUDDK_NODE_ID", default_value = "")]
    node_id: String,

    /// The minimum amount of memory (in MB) per storage server.
    #[arg(long, env = "CLOUDDK_SERVER_MEMORY", default_value_t = DEFAULT_SERVER_MEMORY)]
    server_memory: u32,

    /// The minimum number of processors per storage server.
    #[arg(long, env = "CLOUDDK_SERVER_PROCESSORS", default_value_t = DEFAULT_SERVER_PROCESSORS)]
    server_processors: u32,

    /// The Base64 encoded private key for SSH connections.
    #[arg(long, env = "CLOUDDK_SSH_PRIVATE_KEY")]
    ssh_private_key: String,

    /// The Base64 encoded public key for SSH connections.
    #[arg(long, env = "CLOUDDK_SSH_PUBLIC_KEY")]
    ssh_public_key: String,
}

#[tokio::main]
async fn main() -> Result<(), CsiError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = Configuration {
        api_endpoint: args.api_endpoint,
        api_key: args.api_key,
        csi_endpoint: args.csi_endpoint,
        node_id: args.node_id,
        server_memory: args.server_memory,
        server_processors: args.server_processors,
        ssh_private_key: Configuration::decode_key(&args.ssh_private_key)?,
        ssh_public_key: Configuration::decode_key(&args.ssh_public_key)?,
    };

    info!(name = DRIVER_NAME, version = DRIVER_VERSION, "running CSI driver");

    let backend = Arc::new(CloudDkBackend::new(&config)?);
    let server = CsiServer::bind(&config.socket_path()?, backend)?;
    server.serve().await
}
