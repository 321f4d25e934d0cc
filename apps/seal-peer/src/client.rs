//! Line client: stdin lines out, echoed records to stdout

use std::net::SocketAddr;

use crypto_session::Session;
use net_transport::{Channel, QuicTransport, SecureChannel, TransportSlot};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::info;

use crate::config::{PeerConfig, TransportKind};

/// AAD tag carried by text lines
pub const LINE_AAD: [u8; 2] = [0x00, 0x01];

pub async fn run(config: PeerConfig) -> anyhow::Result<()> {
    let mut slot = TransportSlot::new();

    // Keeps the QUIC connection alive for as long as the stream is in use
    let quic = match config.transport {
        TransportKind::Tcp => {
            slot.install_direct(TcpStream::connect(config.connect_addr).await?);
            None
        }
        TransportKind::Quic => {
            let bind = if config.connect_addr.is_ipv4() {
                SocketAddr::from(([0, 0, 0, 0], 0))
            } else {
                SocketAddr::from(([0u16; 8], 0))
            };
            let transport = QuicTransport::new_client(bind)?;
            transport.connect(config.connect_addr).await?;
            slot.install_multiplexed(transport.open_bi_stream().await?);
            Some(transport)
        }
    };

    let channel = slot.take_channel()?;
    let session = Session::new(config.role(), config.curve, config.suite)?;
    let secure: SecureChannel<Channel> =
        SecureChannel::establish(session, channel, config.confirm).await?;
    info!(
        session = %secure.session().id().short(),
        "Connected to {}", config.connect_addr
    );

    let (mut sender, mut receiver) = secure.split();

    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some((_, data)) = receiver.recv().await? {
            stdout.write_all(&data).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        anyhow::Ok(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        sender.send(LINE_AAD, line.as_bytes()).await?;
    }
    sender.shutdown().await?;

    printer.await??;
    if let Some(transport) = quic {
        transport.close("done");
        transport.wait_idle().await;
    }
    Ok(())
}
