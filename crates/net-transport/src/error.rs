//! Transport error types

use crypto_session::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Datagram too large: {size} bytes (max: {max})")]
    DatagramTooLarge { size: usize, max: usize },

    #[error("Record too large: {size} bytes (max: {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Send error: {0}")]
    Send(String),

    #[error("Receive error: {0}")]
    Receive(String),

    #[error("Session error: {0}")]
    Session(#[from] CryptoError),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the peer failed record authentication
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Session(CryptoError::AuthFailure))
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
