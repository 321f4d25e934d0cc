//! Key schedule: hashed ECDH secret -> two directional AEAD keys

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use shared_protocol::{AeadSuite, SessionRole};
use zeroize::Zeroizing;

use crate::{CryptoError, CryptoResult, RESERVED_SECRET_SIZE, SHARED_SECRET_SIZE};

const EMPTY_SALT: &[u8] = &[];

/// Inputs to the key schedule
///
/// `secret_reserved` is the slot for a future KEM secret. It is always
/// present and currently all zeros; it is not yet mixed into the IKM.
pub struct KeySchedule {
    secret_ecdh: Zeroizing<[u8; SHARED_SECRET_SIZE]>,
    secret_reserved: Zeroizing<[u8; RESERVED_SECRET_SIZE]>,
}

/// One key per direction, sized for the suite
pub struct DirectionKeys {
    pub(crate) tx: Zeroizing<Vec<u8>>,
    pub(crate) rx: Zeroizing<Vec<u8>>,
}

impl DirectionKeys {
    pub fn key_len(&self) -> usize {
        self.tx.len()
    }
}

impl KeySchedule {
    /// Hash the raw ECDH output into `S1` and materialize the zero `S2`
    pub fn new(raw_shared: &[u8]) -> Self {
        let mut secret_ecdh = Zeroizing::new([0u8; SHARED_SECRET_SIZE]);
        secret_ecdh.copy_from_slice(&Sha256::digest(raw_shared));

        Self {
            secret_ecdh,
            secret_reserved: Zeroizing::new([0u8; RESERVED_SECRET_SIZE]),
        }
    }

    pub fn secret_ecdh(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.secret_ecdh
    }

    pub fn secret_reserved(&self) -> &[u8; RESERVED_SECRET_SIZE] {
        &self.secret_reserved
    }

    /// HKDF input keying material
    // Becomes S1 || S2 once the reserved slot carries a KEM secret.
    fn input_key_material(&self) -> &[u8] {
        &self.secret_ecdh[..]
    }

    /// Expand `2 * key_len` bytes with HKDF-SHA256 (empty salt, empty info)
    /// and hand the halves out by role.
    ///
    /// The first half is the initiator's send key, the second the
    /// responder's.
    pub fn derive(&self, suite: AeadSuite, role: SessionRole) -> CryptoResult<DirectionKeys> {
        let key_len = suite.key_len().ok_or(CryptoError::UnsupportedSuite(suite))?;

        let hk = Hkdf::<Sha256>::new(Some(EMPTY_SALT), self.input_key_material());
        let mut okm = Zeroizing::new(vec![0u8; key_len * 2]);
        hk.expand(&[], &mut okm)
            .map_err(|e| CryptoError::KeyScheduleFailure(e.to_string()))?;

        let first = Zeroizing::new(okm[..key_len].to_vec());
        let second = Zeroizing::new(okm[key_len..].to_vec());

        let (tx, rx) = match role {
            SessionRole::Initiator => (first, second),
            SessionRole::Responder => (second, first),
        };

        Ok(DirectionKeys { tx, rx })
    }
}
