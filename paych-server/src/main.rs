//! Payment channel node server
//!
//! Exposes a payment channel node over two transports: an HTTP/WebSocket
//! streaming API and a raw multiplexed TCP API.

mod api;
mod config;
mod server;
mod shutdown;
mod state;
mod tcp;

use clap::Parser;
use config::ConfigLoader;
use config::file::RawConfig;
use config::runtime::SharedConfig;
use paych_core::engine::NodeApi;
use paych_core::memory::MemoryNode;
use paych_core::subscriptions::Subscriptions;
use paych_sdk::objects::SessionId;
use server::run_server;
use shutdown::{broadcast_shutdown, spawn_config_reload_handler};
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tcp::RawServer;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Payment channel node - streaming and raw API server
#[derive(Parser, Debug)]
#[command(name = "paych-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "PAYCH_CONFIG", default_value = "./paych.toml")]
    config: PathBuf,

    /// Override the streaming listen address (e.g., 0.0.0.0:50051)
    #[arg(short, long, env = "PAYCH_LISTEN")]
    listen: Option<SocketAddr>,

    /// Override the raw transport listen address (e.g., 0.0.0.0:50052)
    #[arg(long, env = "PAYCH_RAW_LISTEN")]
    raw_listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    tracing::info!("Starting paych-server v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = Arc::new(ConfigLoader::new(
        &args.config,
        args.listen,
        args.raw_listen,
    ));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!("Configuration loaded from {:?}", config_loader.path());

    let node = MemoryNode::new();
    let subscriptions = Arc::new(Subscriptions::new(node.clone() as Arc<dyn NodeApi>));
    let shared_config = SharedConfig::new(loaded_config.runtime.clone());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let state = AppState::new(subscriptions.clone(), shared_config.clone(), shutdown_rx.clone());

    tokio::spawn(broadcast_shutdown(shutdown_tx));
    let reload_notify = spawn_config_reload_handler(shared_config.clone(), config_loader);

    let raw = if loaded_config.raw.enabled {
        let session = raw_session(&node, &loaded_config.raw).await?;
        let listener = TcpListener::bind(loaded_config.raw.listen).await.map_err(|e| {
            tracing::error!("Failed to bind raw transport on {}: {}", loaded_config.raw.listen, e);
            e
        })?;
        let server = Arc::new(RawServer::new(subscriptions.clone(), session, shared_config));
        Some(tokio::spawn(tcp::serve(listener, server, shutdown_rx)))
    } else {
        tracing::info!("Raw transport disabled");
        None
    };

    let listener = TcpListener::bind(loaded_config.listen).await.map_err(|e| {
        tracing::error!("Failed to bind {}: {}", loaded_config.listen, e);
        e
    })?;
    let streams = state.streams.clone();
    let result = run_server(listener, state).await;

    // Signal the config reload handler to stop
    reload_notify.notify_one();

    tracing::info!("Closing open streams and subscriptions...");
    streams.raise_all();
    subscriptions.close_all().await;
    if let Some(raw) = raw
        && let Err(e) = raw.await
    {
        tracing::error!("Raw transport task failed: {}", e);
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// The session every raw request acts on.
async fn raw_session(node: &Arc<MemoryNode>, raw: &RawConfig) -> anyhow::Result<SessionId> {
    if let Some(id) = &raw.session_id {
        if node.memory_session(id).is_none() {
            node.insert_session(id.clone());
        }
        return Ok(id.clone());
    }
    let id = node
        .open_session(raw.session_config.as_deref())
        .await
        .map_err(|e| {
            tracing::error!("Failed to open raw transport session: {}", e);
            e
        })?;
    tracing::info!(session = %id, "Opened raw transport session");
    Ok(id)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
