//! Session identity, roles and lifecycle states

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ProtocolError, ProtocolResult};

/// Identifier attached to a session for log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, enough to tell sessions apart in logs
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session role
///
/// Roles only decide which half of the derived key material each side sends
/// with. The initiator seals with the first derived key and opens with the
/// second; the responder does the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionRole {
    /// Side that dialed the transport
    Initiator,
    /// Side that accepted the transport
    Responder,
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    /// Local key pair generated, peer key unknown
    Fresh = 0,
    /// Peer public key accepted
    PubExchanged = 1,
    /// Directional keys derived; records may flow
    Open = 2,
    /// Torn down, keys dropped; terminal
    Closed = 3,
}

impl SessionState {
    /// Whether `self -> next` is a legal lifecycle step
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Fresh, Self::PubExchanged)
                | (Self::PubExchanged, Self::Open)
                | (Self::Fresh | Self::PubExchanged | Self::Open, Self::Closed)
        )
    }

    /// Validate a transition, returning the new state
    pub fn transition(self, next: SessionState) -> ProtocolResult<SessionState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ProtocolError::InvalidStateTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Fresh,
            1 => Self::PubExchanged,
            2 => Self::Open,
            _ => Self::Closed,
        }
    }

    pub fn is_open(self) -> bool {
        self == Self::Open
    }

    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}
