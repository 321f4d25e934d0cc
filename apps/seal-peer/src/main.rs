//! Sealink Peer
//!
//! Runs either an echo server or a line client over sealed sessions.

mod client;
mod config;
mod registry;
mod server;

use std::path::PathBuf;

use tracing::info;

use crate::config::{Mode, PeerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("seal_peer=debug".parse()?)
                .add_directive("crypto_session=info".parse()?)
                .add_directive("net_transport=info".parse()?),
        )
        .init();

    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("SEAL_PEER_CONFIG").map(PathBuf::from));
    let config = PeerConfig::load(path.as_deref())?;

    info!(
        mode = ?config.mode,
        transport = ?config.transport,
        curve = %config.curve,
        suite = %config.suite,
        "Starting Sealink peer"
    );

    match config.mode {
        Mode::Server => server::run(config).await,
        Mode::Client => client::run(config).await,
    }
}
