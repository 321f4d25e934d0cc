//! Ephemeral ECDH key pairs over X25519 and P-521

use p521::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use shared_protocol::Curve;
use x25519_dalek::StaticSecret;
use zeroize::Zeroizing;

use crate::{CryptoError, CryptoResult};

/// SEC1 tag for an uncompressed point
const SEC1_UNCOMPRESSED: u8 = 0x04;

enum AgentSecret {
    X25519(StaticSecret),
    P521(p521::SecretKey),
}

/// Peer public key that passed validation for its curve
#[derive(Clone)]
pub enum PeerPublicKey {
    X25519(x25519_dalek::PublicKey),
    P521(p521::PublicKey),
}

impl PeerPublicKey {
    pub fn curve(&self) -> Curve {
        match self {
            Self::X25519(_) => Curve::X25519,
            Self::P521(_) => Curve::P521,
        }
    }
}

impl std::fmt::Debug for PeerPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PeerPublicKey").field(&self.curve()).finish()
    }
}

/// Ephemeral key pair for one session
///
/// The private half is zeroized when the agent is dropped.
pub struct CurveAgent {
    curve: Curve,
    secret: AgentSecret,
    public_key: Vec<u8>,
}

impl CurveAgent {
    /// Generate a fresh ephemeral key pair on `curve`
    pub fn generate(curve: Curve) -> Self {
        let (secret, public_key) = match curve {
            Curve::X25519 => {
                let secret = StaticSecret::random_from_rng(OsRng);
                let public = x25519_dalek::PublicKey::from(&secret);
                (AgentSecret::X25519(secret), public.as_bytes().to_vec())
            }
            Curve::P521 => {
                let secret = p521::SecretKey::random(&mut OsRng);
                let public = secret.public_key().to_encoded_point(false);
                (AgentSecret::P521(secret), public.as_bytes().to_vec())
            }
        };

        Self {
            curve,
            secret,
            public_key,
        }
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// Raw public key bytes as they go on the wire
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key
    }

    /// Raw ECDH shared secret with `peer`
    ///
    /// X25519 yields 32 bytes, P-521 the 66-byte x-coordinate. Callers hash
    /// the result straight away.
    pub fn compute_shared(&self, peer: &PeerPublicKey) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let shared = match (&self.secret, peer) {
            (AgentSecret::X25519(secret), PeerPublicKey::X25519(public)) => {
                let shared = secret.diffie_hellman(public);
                // Low-order peer points collapse the output to zero
                if !shared.was_contributory() {
                    return Err(CryptoError::ShareFailure);
                }
                Zeroizing::new(shared.as_bytes().to_vec())
            }
            (AgentSecret::P521(secret), PeerPublicKey::P521(public)) => {
                let shared =
                    p521::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
                Zeroizing::new(shared.raw_secret_bytes().to_vec())
            }
            _ => return Err(CryptoError::ShareFailure),
        };

        if shared.len() != self.curve.shared_secret_len() {
            return Err(CryptoError::ShareFailure);
        }
        Ok(shared)
    }
}

/// Validate raw public key bytes for `curve`
///
/// Rejects wrong lengths, the all-zero X25519 key, compressed or identity
/// P-521 encodings, and points that are not on the curve.
pub fn parse_public(curve: Curve, bytes: &[u8]) -> CryptoResult<PeerPublicKey> {
    let expected = curve.public_key_len();
    if bytes.len() != expected {
        return Err(CryptoError::InvalidPublicKey(format!(
            "{curve} public key must be {expected} bytes, got {}",
            bytes.len()
        )));
    }

    match curve {
        Curve::X25519 => {
            let mut raw = [0u8; 32];
            raw.copy_from_slice(bytes);
            if raw.iter().all(|b| *b == 0) {
                return Err(CryptoError::InvalidPublicKey(
                    "x25519 public key is the zero point".into(),
                ));
            }
            Ok(PeerPublicKey::X25519(x25519_dalek::PublicKey::from(raw)))
        }
        Curve::P521 => {
            if bytes[0] != SEC1_UNCOMPRESSED {
                return Err(CryptoError::InvalidPublicKey(
                    "p521 public key must use uncompressed form".into(),
                ));
            }
            let public = p521::PublicKey::from_sec1_bytes(bytes).map_err(|_| {
                CryptoError::InvalidPublicKey("p521 point is not on the curve".into())
            })?;
            Ok(PeerPublicKey::P521(public))
        }
    }
}
