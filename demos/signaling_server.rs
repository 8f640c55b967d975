//! Rendezvous server
//!
//! Runs the WebSocket rendezvous that phones and desktops register with.
//! Pass the bind address as the first argument (default `0.0.0.0:9000`);
//! set `CAMLINK_DEBUG=1` for debug logging.

use anyhow::Context;
use camlink::{DebugLogger, GlobalConfig, RendezvousServer};
use std::net::SocketAddr;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GlobalConfig::from_env();
    DebugLogger::new()
        .with_debug(config.debug_logging)
        .install()?;

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:9000".to_string())
        .parse()
        .context("invalid bind address")?;

    let server = RendezvousServer::new(addr);
    let serving = server.clone();
    let handle = tokio::spawn(async move { serving.start().await });

    info!("🚀 CamLink rendezvous on ws://{}", addr);
    info!("   Senders share {}#/mobile-sender?id=<id>", config.base_url);
    info!("   Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!(
        "🛑 Stopping ({} peers registered, {} calls active)",
        server.registered_peers().len(),
        server.active_calls().len()
    );
    server.stop().await?;
    handle.await??;
    Ok(())
}
