//! Error types for the protocol

use thiserror::Error;

/// Protocol error
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown curve identifier: {0}")]
    UnknownCurve(u8),

    #[error("Unknown AEAD suite identifier: {0}")]
    UnknownSuite(u8),

    #[error("Unrecognized name: {0}")]
    UnknownName(String),

    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Record too short: {size} bytes (min: {min})")]
    RecordTooShort { size: usize, min: usize },

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        from: crate::SessionState,
        to: crate::SessionState,
    },
}

/// Result type alias for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
