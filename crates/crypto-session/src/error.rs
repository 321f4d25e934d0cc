//! Crypto session error types

use shared_protocol::{AeadSuite, ProtocolError, SessionState};
use thiserror::Error;

/// Cryptographic operation error
///
/// Any of these raised by a [`Session`](crate::Session) leaves it closed.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Shared secret computation failed")]
    ShareFailure,

    #[error("Key schedule failed: {0}")]
    KeyScheduleFailure(String),

    #[error("Unsupported AEAD suite: {0}")]
    UnsupportedSuite(AeadSuite),

    #[error("Handshake framing error: expected {expected} bytes, got {actual}")]
    HandshakeFraming { expected: usize, actual: usize },

    #[error("Decryption failed: authentication tag mismatch")]
    AuthFailure,

    #[error("Encryption failed")]
    SealFailure,

    #[error("Send counter exhausted")]
    CounterExhausted,

    #[error("Session closed")]
    SessionClosed,

    #[error("Invalid session state: {from:?} -> {to:?}")]
    InvalidState { from: SessionState, to: SessionState },

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Envelope error: {0}")]
    Envelope(#[from] ProtocolError),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Malformed ciphertext: {0} bytes")]
    MalformedCiphertext(usize),

    #[error("Password decryption failed")]
    PasswordDecryption,
}

impl CryptoError {
    pub(crate) fn invalid_state(from: SessionState, to: SessionState) -> Self {
        if from == SessionState::Closed {
            Self::SessionClosed
        } else {
            Self::InvalidState { from, to }
        }
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;
