//! QUIC transport: bidirectional streams for handshakes, datagrams for records

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crypto_session::{AAD_SIZE, Session};
use parking_lot::RwLock;
use quinn::{
    ClientConfig, Connection, ConnectionError, Endpoint, IdleTimeout, ServerConfig,
    TransportConfig, VarInt,
};
use shared_protocol::MIN_RECORD_SIZE;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::{
    ALPN_PROTOCOL, BiStream, MAX_DATAGRAM_SIZE, SERVER_NAME, TransportError, TransportResult,
};

const IDLE_TIMEOUT_MS: u32 = 30_000;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);
const DATAGRAM_QUEUE_DEPTH: usize = 1000;

/// A QUIC endpoint with at most one live connection
pub struct QuicTransport {
    endpoint: Endpoint,
    connection: RwLock<Option<Connection>>,
    datagram_tx: mpsc::Sender<Bytes>,
    datagram_rx: Mutex<mpsc::Receiver<Bytes>>,
}

impl QuicTransport {
    /// Create a client endpoint bound to `bind_addr`
    pub fn new_client(bind_addr: SocketAddr) -> TransportResult<Self> {
        let mut endpoint = Endpoint::client(bind_addr)?;
        endpoint.set_default_client_config(Self::create_client_config()?);
        Ok(Self::with_endpoint(endpoint))
    }

    /// Create a server endpoint with a fresh self-signed certificate
    pub fn new_server(bind_addr: SocketAddr) -> TransportResult<Self> {
        let endpoint = Endpoint::server(Self::create_server_config()?, bind_addr)?;
        Ok(Self::with_endpoint(endpoint))
    }

    fn with_endpoint(endpoint: Endpoint) -> Self {
        let (datagram_tx, datagram_rx) = mpsc::channel(DATAGRAM_QUEUE_DEPTH);
        Self {
            endpoint,
            connection: RwLock::new(None),
            datagram_tx,
            datagram_rx: Mutex::new(datagram_rx),
        }
    }

    fn transport_config() -> TransportConfig {
        let mut transport = TransportConfig::default();
        transport.max_idle_timeout(Some(IdleTimeout::from(VarInt::from_u32(IDLE_TIMEOUT_MS))));
        transport.keep_alive_interval(Some(KEEP_ALIVE_INTERVAL));
        transport.datagram_receive_buffer_size(Some(MAX_DATAGRAM_SIZE * DATAGRAM_QUEUE_DEPTH));
        transport
    }

    /// Client TLS config. The certificate is not checked: peers are
    /// authenticated by the session layer, not by TLS.
    fn create_client_config() -> TransportResult<ClientConfig> {
        let mut crypto = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();
        crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

        let mut config = ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
                .map_err(|e| TransportError::Tls(e.to_string()))?,
        ));
        config.transport_config(Arc::new(Self::transport_config()));
        Ok(config)
    }

    fn create_server_config() -> TransportResult<ServerConfig> {
        let certified = rcgen::generate_simple_self_signed(vec![SERVER_NAME.to_string()])
            .map_err(|e| TransportError::Certificate(e.to_string()))?;

        let cert_chain = vec![certified.cert.der().clone()];
        let key = rustls::pki_types::PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());

        let mut crypto = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(cert_chain, key.into())
        .map_err(|e| TransportError::Tls(e.to_string()))?;
        crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

        let mut config = ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
                .map_err(|e| TransportError::Tls(e.to_string()))?,
        ));
        config.transport_config(Arc::new(Self::transport_config()));
        Ok(config)
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Connect to a remote peer
    pub async fn connect(&self, addr: SocketAddr) -> TransportResult<()> {
        if self.is_connected() {
            return Err(TransportError::AlreadyConnected);
        }

        info!("Connecting to {}", addr);
        let connection = self
            .endpoint
            .connect(addr, SERVER_NAME)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("Connected to {}", addr);
        self.install(connection);
        Ok(())
    }

    /// Wait for an incoming connection
    pub async fn accept(&self) -> TransportResult<()> {
        if self.is_connected() {
            return Err(TransportError::AlreadyConnected);
        }

        debug!("Waiting for incoming connection");
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or_else(|| TransportError::ConnectionFailed("Endpoint closed".to_string()))?;

        let connection = incoming
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("Accepted connection from {}", connection.remote_address());
        self.install(connection);
        Ok(())
    }

    fn install(&self, connection: Connection) {
        *self.connection.write() = Some(connection.clone());
        self.spawn_datagram_receiver(connection);
    }

    fn connection(&self) -> TransportResult<Connection> {
        self.connection
            .read()
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    fn spawn_datagram_receiver(&self, connection: Connection) {
        let tx = self.datagram_tx.clone();

        tokio::spawn(async move {
            loop {
                match connection.read_datagram().await {
                    Ok(data) => {
                        if tx.send(data).await.is_err() {
                            debug!("Datagram queue dropped");
                            break;
                        }
                    }
                    Err(
                        ConnectionError::LocallyClosed
                        | ConnectionError::ApplicationClosed(_)
                        | ConnectionError::ConnectionClosed(_),
                    ) => {
                        debug!("Connection closed, stopping datagram receiver");
                        break;
                    }
                    Err(e) => {
                        warn!("Datagram receive error: {}", e);
                        break;
                    }
                }
            }
        });
    }

    /// Send one unreliable datagram
    pub fn send_datagram(&self, data: Bytes) -> TransportResult<()> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::DatagramTooLarge {
                size: data.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }

        self.connection()?
            .send_datagram(data)
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    /// Receive the next datagram
    pub async fn recv_datagram(&self) -> TransportResult<Bytes> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.datagram_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| TransportError::Receive("Datagram queue closed".to_string()))
    }

    /// Seal `data` and send the record as one datagram
    ///
    /// Size is checked before sealing so an oversized payload does not burn
    /// a counter value.
    pub fn send_sealed_datagram(
        &self,
        session: &Session,
        aad: [u8; AAD_SIZE],
        data: &[u8],
    ) -> TransportResult<()> {
        let size = data.len() + MIN_RECORD_SIZE;
        if size > MAX_DATAGRAM_SIZE {
            return Err(TransportError::DatagramTooLarge {
                size,
                max: MAX_DATAGRAM_SIZE,
            });
        }

        let record = session.seal(data, aad)?;
        self.send_datagram(Bytes::from(record))
    }

    /// Receive one datagram and open it as a record
    ///
    /// Datagrams may arrive reordered; any order is accepted.
    pub async fn recv_sealed_datagram(
        &self,
        session: &Session,
    ) -> TransportResult<([u8; AAD_SIZE], Vec<u8>)> {
        let record = self.recv_datagram().await?;
        let plaintext = session.open_record(&record)?;
        let mut aad = [0u8; AAD_SIZE];
        aad.copy_from_slice(&record[..AAD_SIZE]);
        Ok((aad, plaintext))
    }

    /// Open a bidirectional stream. The peer sees it once data is written.
    pub async fn open_bi_stream(&self) -> TransportResult<BiStream> {
        let (send, recv) = self
            .connection()?
            .open_bi()
            .await
            .map_err(|e| TransportError::Stream(e.to_string()))?;
        Ok(BiStream::new(send, recv))
    }

    /// Accept a bidirectional stream opened by the peer
    pub async fn accept_bi_stream(&self) -> TransportResult<BiStream> {
        let (send, recv) = self
            .connection()?
            .accept_bi()
            .await
            .map_err(|e| TransportError::Stream(e.to_string()))?;
        Ok(BiStream::new(send, recv))
    }

    pub fn is_connected(&self) -> bool {
        self.connection.read().is_some()
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.connection.read().as_ref().map(Connection::remote_address)
    }

    /// Close the connection
    pub fn close(&self, reason: &str) {
        if let Some(conn) = self.connection.write().take() {
            conn.close(0u32.into(), reason.as_bytes());
            info!("Connection closed: {}", reason);
        }
    }

    /// Wait until all outgoing data has been acknowledged or timed out
    pub async fn wait_idle(&self) {
        self.endpoint.wait_idle().await;
    }

    pub fn stats(&self) -> Option<ConnectionStats> {
        self.connection.read().as_ref().map(|conn| {
            let stats = conn.stats();
            ConnectionStats {
                rtt: stats.path.rtt,
                congestion_window: stats.path.cwnd,
                bytes_sent: stats.udp_tx.bytes,
                bytes_received: stats.udp_rx.bytes,
                packets_sent: stats.path.sent_packets,
                packets_lost: stats.path.lost_packets,
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub rtt: Duration,
    pub congestion_window: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_lost: u64,
}

#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_protocol::{AeadSuite, Curve, SessionRole};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_unconnected_transport() {
        let transport = QuicTransport::new_client(loopback()).unwrap();
        assert!(!transport.is_connected());
        assert!(transport.remote_address().is_none());
        assert!(transport.stats().is_none());
        assert!(matches!(
            transport.send_datagram(Bytes::from_static(b"x")),
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.recv_datagram().await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.open_bi_stream().await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let transport = QuicTransport::new_server(loopback()).unwrap();
        assert_ne!(transport.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_oversized_datagram_rejected_before_sealing() {
        let transport = QuicTransport::new_client(loopback()).unwrap();
        let session =
            Session::new(SessionRole::Initiator, Curve::X25519, AeadSuite::Aes256Gcm).unwrap();

        let data = vec![0u8; MAX_DATAGRAM_SIZE];
        assert!(matches!(
            transport.send_sealed_datagram(&session, [0, 0], &data),
            Err(TransportError::DatagramTooLarge { .. })
        ));
        assert!(matches!(
            transport.send_datagram(Bytes::from(vec![0u8; MAX_DATAGRAM_SIZE + 1])),
            Err(TransportError::DatagramTooLarge { .. })
        ));
    }
}
