//! Echo server: every record is sent back with the same AAD

use std::net::SocketAddr;
use std::time::SystemTime;

use crypto_session::Session;
use net_transport::{Channel, QuicTransport, SecureChannel, TransportSlot};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::{PeerConfig, TransportKind};
use crate::registry::{SessionEntry, SessionRegistry};

pub async fn run(config: PeerConfig) -> anyhow::Result<()> {
    let registry = SessionRegistry::new();
    match config.transport {
        TransportKind::Tcp => run_tcp(config, registry).await,
        TransportKind::Quic => run_quic(config, registry).await,
    }
}

async fn run_tcp(config: PeerConfig, registry: SessionRegistry) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("Listening on tcp://{}", listener.local_addr()?);

    loop {
        let (stream, remote) = listener.accept().await?;
        let mut slot = TransportSlot::new();
        slot.install_direct(stream);
        let channel = slot.take_channel()?;

        let config = config.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(channel, Some(remote), &config, &registry).await {
                warn!("Session with {} ended: {}", remote, e);
            }
        });
    }
}

async fn run_quic(config: PeerConfig, registry: SessionRegistry) -> anyhow::Result<()> {
    let transport = QuicTransport::new_server(config.listen_addr)?;
    info!("Listening on quic://{}", transport.local_addr()?);

    loop {
        transport.accept().await?;
        let remote = transport.remote_address();

        // Each bidirectional stream carries its own session
        while let Ok(stream) = transport.accept_bi_stream().await {
            let mut slot = TransportSlot::new();
            slot.install_multiplexed(stream);
            let channel = slot.take_channel()?;

            let config = config.clone();
            let registry = registry.clone();
            tokio::spawn(async move {
                if let Err(e) = serve(channel, remote, &config, &registry).await {
                    warn!("Stream session ended: {}", e);
                }
            });
        }

        transport.close("peer gone");
        debug!("{} sessions still open", registry.len());
    }
}

async fn serve(
    channel: Channel,
    remote: Option<SocketAddr>,
    config: &PeerConfig,
    registry: &SessionRegistry,
) -> anyhow::Result<()> {
    let carrier = channel.kind();
    let session = Session::new(config.role(), config.curve, config.suite)?;
    let mut secure = SecureChannel::establish(session, channel, config.confirm).await?;

    let id = secure.session().id();
    registry.insert(
        id,
        SessionEntry {
            remote,
            carrier,
            curve: config.curve,
            suite: config.suite,
            opened_at: SystemTime::now(),
            records: 0,
        },
    );
    info!(session = %id.short(), carrier, "Session open ({} live)", registry.len());

    let result = echo(&mut secure, registry).await;

    if let Some(entry) = registry.remove(&id) {
        info!(
            session = %id.short(),
            remote = ?entry.remote,
            carrier = entry.carrier,
            curve = %entry.curve,
            suite = %entry.suite,
            records = entry.records,
            elapsed = ?entry.opened_at.elapsed().unwrap_or_default(),
            "Session finished"
        );
    }
    result?;
    secure.close().await?;
    Ok(())
}

async fn echo(secure: &mut SecureChannel<Channel>, registry: &SessionRegistry) -> anyhow::Result<()> {
    let id = secure.session().id();
    while let Some((aad, data)) = secure.recv().await? {
        debug!(session = %id.short(), len = data.len(), "Echoing record");
        secure.send(aad, &data).await?;
        registry.record_echoed(&id);
    }
    Ok(())
}
