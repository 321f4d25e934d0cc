//! Network Transport - carriers for sealed sessions
//!
//! The handshake and records run either over a QUIC bidirectional stream
//! (multiplexed) or over a direct TCP connection. Stream carriers delimit
//! records with a length prefix; QUIC datagrams carry one record each.

mod channel;
mod error;
mod secure;
mod transport;

pub use channel::*;
pub use error::*;
pub use secure::*;
pub use transport::*;

/// Default QUIC port
pub const DEFAULT_QUIC_PORT: u16 = 19823;

/// Maximum datagram size
pub const MAX_DATAGRAM_SIZE: usize = 1200;

/// ALPN token and certificate name used by QUIC endpoints
pub const ALPN_PROTOCOL: &[u8] = b"sealink";
pub const SERVER_NAME: &str = "sealink.local";
