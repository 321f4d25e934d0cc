//! Curve and AEAD suite identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Elliptic curve used for the ephemeral key agreement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Curve {
    /// NIST P-521, SEC1 uncompressed public keys
    P521 = 0x01,
    /// Curve25519 Montgomery form
    X25519 = 0x02,
}

impl Curve {
    /// Length of a raw public key on the wire
    pub const fn public_key_len(self) -> usize {
        match self {
            // 0x04 || x (66) || y (66)
            Self::P521 => 133,
            Self::X25519 => 32,
        }
    }

    /// Length of the raw ECDH shared secret before hashing
    pub const fn shared_secret_len(self) -> usize {
        match self {
            Self::P521 => 66,
            Self::X25519 => 32,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::P521 => "p521",
            Self::X25519 => "x25519",
        }
    }
}

impl Default for Curve {
    fn default() -> Self {
        Self::X25519
    }
}

impl TryFrom<u8> for Curve {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::P521),
            0x02 => Ok(Self::X25519),
            other => Err(ProtocolError::UnknownCurve(other)),
        }
    }
}

impl FromStr for Curve {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p521" | "p-521" | "secp521r1" => Ok(Self::P521),
            "x25519" | "curve25519" => Ok(Self::X25519),
            other => Err(ProtocolError::UnknownName(other.to_string())),
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AEAD construction protecting records
///
/// `None` is representable so that configuration and peers can name it, but
/// a session refuses to be built with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AeadSuite {
    /// Cleartext; always rejected
    None = 0x00,
    /// AES-128 in GCM mode, 12-byte nonces
    Aes128Gcm = 0x01,
    /// AES-256 in GCM mode, 12-byte nonces
    Aes256Gcm = 0x02,
    /// XChaCha20-Poly1305, 24-byte nonces
    ChaCha20Poly1305 = 0x03,
}

impl AeadSuite {
    /// Symmetric key length, or `None` for the cleartext suite
    pub const fn key_len(self) -> Option<usize> {
        match self {
            Self::None => None,
            Self::Aes128Gcm => Some(16),
            Self::Aes256Gcm | Self::ChaCha20Poly1305 => Some(32),
        }
    }

    /// Full AEAD nonce length, or `None` for the cleartext suite
    pub const fn nonce_len(self) -> Option<usize> {
        match self {
            Self::None => None,
            Self::Aes128Gcm | Self::Aes256Gcm => Some(12),
            Self::ChaCha20Poly1305 => Some(24),
        }
    }

    pub const fn is_encrypting(self) -> bool {
        !matches!(self, Self::None)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Aes128Gcm => "aes128-gcm",
            Self::Aes256Gcm => "aes256-gcm",
            Self::ChaCha20Poly1305 => "xchacha20-poly1305",
        }
    }
}

impl Default for AeadSuite {
    fn default() -> Self {
        Self::Aes256Gcm
    }
}

impl TryFrom<u8> for AeadSuite {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::None),
            0x01 => Ok(Self::Aes128Gcm),
            0x02 => Ok(Self::Aes256Gcm),
            0x03 => Ok(Self::ChaCha20Poly1305),
            other => Err(ProtocolError::UnknownSuite(other)),
        }
    }
}

impl FromStr for AeadSuite {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "aes128-gcm" | "aes128gcm" => Ok(Self::Aes128Gcm),
            "aes256-gcm" | "aes256gcm" => Ok(Self::Aes256Gcm),
            "xchacha20-poly1305" | "chacha20-poly1305" | "chacha20poly1305" => {
                Ok(Self::ChaCha20Poly1305)
            }
            other => Err(ProtocolError::UnknownName(other.to_string())),
        }
    }
}

impl fmt::Display for AeadSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
