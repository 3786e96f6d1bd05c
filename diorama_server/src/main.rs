use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use diorama_deploy::{DockerBackend, Simulation};
use diorama_server::{AppState, Hub, http, hub};
use diorama_store::Store;

/// The Diorama network-simulation backend.
#[derive(Debug, clap::Parser)]
struct Args {
    #[clap(long, env = "DIORAMA_PORT", default_value = "2697")]
    port: u16,
    #[clap(long, env = "DIORAMA_BIND_ADDR", default_value = "0.0.0.0")]
    bind_addr: IpAddr,
    /// Where persisted records and uploaded archives live.
    #[clap(long, env = "DIORAMA_OUT_DIR", default_value = "out")]
    out_dir: PathBuf,
    /// Per-runtime Dockerfiles and glue copied into every build context.
    #[clap(long, env = "DIORAMA_BASE_NODE_FILES", default_value = "./base_node_files")]
    base_node_files_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();
    tracing::debug!(?args, "parsed arguments");

    let store = Store::open(&args.out_dir)?;
    let backend = Arc::new(DockerBackend::connect()?);
    let simulation = Simulation::new(store.clone(), backend, &args.base_node_files_dir);

    let subscribers = Hub::new();
    tokio::spawn(hub::forward_simulation_events(
        simulation.subscribe(),
        subscribers.clone(),
    ));

    let state = Arc::new(AppState {
        store,
        simulation,
        hub: subscribers,
    });

    let addr = SocketAddr::new(args.bind_addr, args.port);
    tracing::info!(%addr, "diorama backend listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, http::router(state)).await?;
    Ok(())
}
