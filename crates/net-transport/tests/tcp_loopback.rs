//! Sealed sessions over direct TCP connections.

use std::time::Duration;

use crypto_session::{AeadSuite, Curve, Session, SessionRole, SessionState};
use net_transport::{SecureChannel, TransportResult, TransportSlot};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Responder that echoes every record back with the same AAD
async fn spawn_echo(curve: Curve, suite: AeadSuite) -> TransportResult<std::net::SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept failed");
        let session = Session::new(SessionRole::Responder, curve, suite).expect("session");
        let mut channel = SecureChannel::establish(session, stream, true)
            .await
            .expect("establish failed");

        while let Some((aad, data)) = channel.recv().await.expect("recv failed") {
            channel.send(aad, &data).await.expect("send failed");
        }
    });

    Ok(addr)
}

#[tokio::test]
async fn test_tcp_echo_all_suites() -> TransportResult<()> {
    for curve in [Curve::X25519, Curve::P521] {
        for suite in [
            AeadSuite::Aes128Gcm,
            AeadSuite::Aes256Gcm,
            AeadSuite::ChaCha20Poly1305,
        ] {
            let addr = spawn_echo(curve, suite).await?;

            let mut slot = TransportSlot::new();
            slot.install_direct(TcpStream::connect(addr).await?);
            let session = Session::new(SessionRole::Initiator, curve, suite)?;
            let mut channel = timeout(
                TIMEOUT,
                SecureChannel::establish(session, slot.take_channel()?, true),
            )
            .await
            .expect("handshake timeout")?;

            let payloads: [&[u8]; 3] = [b"", b"a", &[0x5a; 4096]];
            for (i, payload) in payloads.into_iter().enumerate() {
                channel.send([0x10, i as u8], payload).await?;
                let echoed = timeout(TIMEOUT, channel.recv())
                    .await
                    .expect("echo timeout")?
                    .expect("peer hung up");
                assert_eq!(echoed, ([0x10, i as u8], payload.to_vec()));
            }

            channel.close().await?;
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_tcp_curve_mismatch_fails_handshake() -> TransportResult<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept failed");
        let session =
            Session::new(SessionRole::Responder, Curve::P521, AeadSuite::Aes256Gcm).expect("session");
        SecureChannel::establish(session, stream, false).await.is_err()
    });

    let session = Session::new(SessionRole::Initiator, Curve::X25519, AeadSuite::Aes256Gcm)?;
    let stream = TcpStream::connect(addr).await?;
    let result = timeout(TIMEOUT, SecureChannel::establish(session, stream, false))
        .await
        .expect("handshake timeout");

    // The X25519 side reads only 32 bytes of the P-521 point; the P-521 side
    // never gets a full key.
    if let Ok(channel) = result {
        let (session, _stream) = channel.into_parts();
        assert_eq!(session.state(), SessionState::Open);
    }
    assert!(timeout(TIMEOUT, server).await.expect("server timeout").expect("join"));
    Ok(())
}
