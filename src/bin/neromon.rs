//! `neromon` daemon entrypoint: wires together the transport, RPC client,
//! protocol engine, local stores, and JSON-RPC bridge, then runs until a
//! shutdown signal arrives.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use neromon_core::config::DaemonConfig;
use neromon_core::index::MappingsIndex;
use neromon_core::node::Node;
use neromon_core::paths::DataPaths;
use neromon_core::rpc::{RequestHandler, RpcClient};
use neromon_core::store::{AllowAllVerifier, BlobStore, ContentStore};
use neromon_core::transport::UdpTransport;
use neromon_core::{Error, NodeId};

#[derive(Parser, Debug)]
#[command(name = "neromon", author, version, about = "Marketplace DHT daemon")]
struct Args {
    /// Directory for on-disk state (sqlite index, blob store, bridge socket).
    /// Defaults to the OS-appropriate data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// UDP address to bind the peer transport to.
    #[arg(long)]
    listen: Option<String>,

    /// Bootstrap peer endpoint. May be repeated.
    #[arg(long)]
    bootstrap: Vec<String>,
}

/// Exit codes surfaced to the process's caller (a supervisor or the CLI
/// wrapper), distinguishing configuration problems from runtime failures.
const EXIT_OK: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_BIND_ERROR: u8 = 2;
const EXIT_STORAGE_ERROR: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err((code, e)) => {
            tracing::error!(error = %e, "daemon exited with error");
            ExitCode::from(code)
        }
    }
}

async fn run(args: Args) -> Result<(), (u8, Error)> {
    let paths = DataPaths::resolve(args.data_dir.as_deref()).map_err(|e| (EXIT_CONFIG_ERROR, e))?;
    paths.ensure_exists().map_err(|e| (EXIT_CONFIG_ERROR, e))?;

    let mut config = DaemonConfig::load(&paths.config_path()).map_err(|e| (EXIT_CONFIG_ERROR, e))?;
    config.apply_overrides(args.listen, args.bootstrap);
    tracing::info!(data_dir = %paths.root().display(), listen = %config.listen_addr, "starting neromon daemon");

    let transport = Arc::new(
        UdpTransport::bind(&config.listen_addr)
            .await
            .map_err(|e| (EXIT_BIND_ERROR, e))?,
    );
    let local_id = NodeId::from_identity(transport.local_endpoint().as_bytes());
    let rpc = RpcClient::new(transport, local_id);

    let blobstore = BlobStore::new(paths.blob_store_dir());
    let store = Arc::new(ContentStore::with_blobstore(Arc::new(AllowAllVerifier), blobstore));
    let loaded = store.load_from_disk().await.map_err(|e| (EXIT_STORAGE_ERROR, e))?;
    tracing::info!(records = loaded, "loaded records from disk");

    let index = Arc::new(MappingsIndex::open(paths.sqlite_path()).map_err(|e| (EXIT_STORAGE_ERROR, e))?);

    let node = Node::new(local_id, store, rpc.clone(), index.clone());

    let handler: Arc<dyn RequestHandler> = node.clone();
    tokio::spawn(rpc.clone().run_dispatch_loop(handler));
    tokio::spawn(node.clone().run_maintenance_loop());

    for peer in &config.bootstrap_peers {
        if let Err(e) = node.bootstrap(peer).await {
            tracing::warn!(peer = %peer, error = %e, "bootstrap failed");
        }
    }
    if config.bootstrap_peers.is_empty() {
        tracing::info!("no bootstrap peers configured; starting as a fresh network");
    }

    let bridge = Arc::new(neromon_core::bridge::JsonRpcBridge::new(node.clone(), index));
    let socket_path = paths.bridge_socket_path();
    let bridge_handle = tokio::spawn(async move { bridge.serve(&socket_path).await });

    tokio::select! {
        result = bridge_handle => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err((EXIT_STORAGE_ERROR, e)),
                Err(e) => return Err((EXIT_STORAGE_ERROR, Error::Internal(e.to_string()))),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
