//! Crypto Session - sealed duplex records for Sealink
//!
//! Ephemeral X25519 or P-521 key agreement, an HKDF-SHA256 key schedule
//! that yields one key per direction, and AES-GCM / XChaCha20-Poly1305
//! records whose nonces are the sender's monotonic counter.
//!
//! Direction labeling: the first key produced by the schedule is the
//! initiator's send key and the responder's receive key; the second is the
//! responder's send key and the initiator's receive key.

mod agent;
mod direction;
mod error;
mod handshake;
mod identity;
mod password;
mod schedule;
mod session;

pub use agent::*;
pub use direction::*;
pub use error::*;
pub use handshake::*;
pub use identity::*;
pub use password::*;
pub use schedule::*;
pub use session::*;

pub use shared_protocol::{
    AAD_SIZE, AeadSuite, Curve, NONCE_TAIL_SIZE, RecordView, SessionId, SessionRole,
    SessionState, TAG_SIZE,
};

/// Largest AEAD nonce among supported suites (XChaCha20)
pub(crate) const MAX_NONCE_SIZE: usize = 24;

/// Hashed ECDH secret size (SHA-256 output)
pub const SHARED_SECRET_SIZE: usize = 32;

/// Reserved second key-schedule input, kept zero until a KEM is introduced
pub const RESERVED_SECRET_SIZE: usize = 32;
