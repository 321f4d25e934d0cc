//! Shared Protocol Definitions for Sealink
//!
//! This crate contains the wire-level vocabulary both peers of a sealed
//! session must agree on: curve and AEAD suite identifiers, session roles and
//! states, the record layout, and the signed-handshake envelope.

mod error;
mod packets;
mod session;
mod suite;

pub use error::*;
pub use packets::*;
pub use session::*;
pub use suite::*;

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Length of the application-defined associated data carried by every record
pub const AAD_SIZE: usize = 2;

/// Length of the counter tail of the nonce carried on the wire
pub const NONCE_TAIL_SIZE: usize = 8;

/// AEAD tag length (GCM and Poly1305 alike)
pub const TAG_SIZE: usize = 16;

/// Fixed header in front of every record ciphertext: AAD followed by the nonce tail
pub const RECORD_HEADER_SIZE: usize = AAD_SIZE + NONCE_TAIL_SIZE;

/// Smallest well-formed record: header plus a tag over an empty plaintext
pub const MIN_RECORD_SIZE: usize = RECORD_HEADER_SIZE + TAG_SIZE;
