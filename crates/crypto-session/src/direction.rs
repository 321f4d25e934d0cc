//! Per-direction AEAD state: cipher, nonce length and monotonic counter

use std::sync::atomic::{AtomicU64, Ordering};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::XChaCha20Poly1305;
use shared_protocol::{AAD_SIZE, AeadSuite, NONCE_TAIL_SIZE, encode_record};

use crate::{CryptoError, CryptoResult, MAX_NONCE_SIZE};

/// AEAD primitive bound to one directional key
enum AeadCipher {
    Aes128Gcm(Aes128Gcm),
    Aes256Gcm(Aes256Gcm),
    XChaCha20Poly1305(XChaCha20Poly1305),
}

impl AeadCipher {
    fn new(suite: AeadSuite, key: &[u8]) -> CryptoResult<Self> {
        let invalid = |_| CryptoError::KeyScheduleFailure(format!("bad {suite} key length"));
        match suite {
            AeadSuite::Aes128Gcm => Ok(Self::Aes128Gcm(
                Aes128Gcm::new_from_slice(key).map_err(invalid)?,
            )),
            AeadSuite::Aes256Gcm => Ok(Self::Aes256Gcm(
                Aes256Gcm::new_from_slice(key).map_err(invalid)?,
            )),
            AeadSuite::ChaCha20Poly1305 => Ok(Self::XChaCha20Poly1305(
                XChaCha20Poly1305::new_from_slice(key).map_err(invalid)?,
            )),
            AeadSuite::None => Err(CryptoError::UnsupportedSuite(suite)),
        }
    }

    fn nonce_len(&self) -> usize {
        match self {
            Self::Aes128Gcm(_) | Self::Aes256Gcm(_) => 12,
            Self::XChaCha20Poly1305(_) => 24,
        }
    }

    fn encrypt(&self, nonce: &[u8], payload: Payload<'_, '_>) -> aes_gcm::aead::Result<Vec<u8>> {
        match self {
            Self::Aes128Gcm(c) => c.encrypt(nonce.into(), payload),
            Self::Aes256Gcm(c) => c.encrypt(nonce.into(), payload),
            Self::XChaCha20Poly1305(c) => c.encrypt(nonce.into(), payload),
        }
    }

    fn decrypt(&self, nonce: &[u8], payload: Payload<'_, '_>) -> aes_gcm::aead::Result<Vec<u8>> {
        match self {
            Self::Aes128Gcm(c) => c.decrypt(nonce.into(), payload),
            Self::Aes256Gcm(c) => c.decrypt(nonce.into(), payload),
            Self::XChaCha20Poly1305(c) => c.decrypt(nonce.into(), payload),
        }
    }
}

/// Build the full AEAD nonce from the wire tail
///
/// Nonce format: `nonce_len - 8` zero bytes followed by the big-endian
/// counter. Only the first `nonce_len` bytes of the buffer are meaningful.
pub(crate) fn construct_nonce(nonce_len: usize, tail: [u8; NONCE_TAIL_SIZE]) -> [u8; MAX_NONCE_SIZE] {
    let mut nonce = [0u8; MAX_NONCE_SIZE];
    nonce[nonce_len - NONCE_TAIL_SIZE..nonce_len].copy_from_slice(&tail);
    nonce
}

/// Sending half: seals records under the local send key
pub struct Sealer {
    cipher: AeadCipher,
    counter: AtomicU64,
}

impl Sealer {
    pub fn new(suite: AeadSuite, key: &[u8]) -> CryptoResult<Self> {
        Ok(Self {
            cipher: AeadCipher::new(suite, key)?,
            counter: AtomicU64::new(0),
        })
    }

    pub fn nonce_len(&self) -> usize {
        self.cipher.nonce_len()
    }

    /// Last counter value handed out (0 before the first seal)
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Reserve the next counter value; never reuses one, never wraps
    fn next_counter(&self) -> CryptoResult<u64> {
        self.counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_add(1))
            .map(|previous| previous + 1)
            .map_err(|_| CryptoError::CounterExhausted)
    }

    /// Encrypt `plaintext` and return `aad || nonce_tail || ciphertext || tag`
    ///
    /// The counter is advanced before encryption and stays advanced even if
    /// the AEAD call fails.
    pub fn seal(&self, plaintext: &[u8], aad: [u8; AAD_SIZE]) -> CryptoResult<Vec<u8>> {
        let tail = self.next_counter()?.to_be_bytes();
        let nonce_len = self.nonce_len();
        let nonce = construct_nonce(nonce_len, tail);

        let ciphertext = self
            .cipher
            .encrypt(
                &nonce[..nonce_len],
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::SealFailure)?;

        Ok(encode_record(aad, tail, &ciphertext))
    }

    #[cfg(test)]
    pub(crate) fn set_counter(&self, value: u64) {
        self.counter.store(value, Ordering::Release);
    }
}

/// Receiving half: opens records sealed under the peer's send key
pub struct Opener {
    cipher: AeadCipher,
    highest: AtomicU64,
}

impl Opener {
    pub fn new(suite: AeadSuite, key: &[u8]) -> CryptoResult<Self> {
        Ok(Self {
            cipher: AeadCipher::new(suite, key)?,
            highest: AtomicU64::new(0),
        })
    }

    pub fn nonce_len(&self) -> usize {
        self.cipher.nonce_len()
    }

    /// Highest counter accepted so far; advisory only
    pub fn counter(&self) -> u64 {
        self.highest.load(Ordering::Acquire)
    }

    /// Whether a record with this tail would arrive after everything
    /// accepted so far. Never used to reject records.
    pub fn is_in_order(&self, nonce_tail: [u8; NONCE_TAIL_SIZE]) -> bool {
        u64::from_be_bytes(nonce_tail) > self.counter()
    }

    /// Verify and decrypt one record. Every failure is [`CryptoError::AuthFailure`].
    pub fn open(
        &self,
        aad: [u8; AAD_SIZE],
        nonce_tail: [u8; NONCE_TAIL_SIZE],
        ciphertext_and_tag: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let nonce_len = self.nonce_len();
        let nonce = construct_nonce(nonce_len, nonce_tail);

        let plaintext = self
            .cipher
            .decrypt(
                &nonce[..nonce_len],
                Payload {
                    msg: ciphertext_and_tag,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::AuthFailure)?;

        self.highest
            .fetch_max(u64::from_be_bytes(nonce_tail), Ordering::AcqRel);

        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_protocol::RecordView;

    fn pair(suite: AeadSuite) -> (Sealer, Opener) {
        let key = vec![0x5Au8; suite.key_len().unwrap()];
        (
            Sealer::new(suite, &key).unwrap(),
            Opener::new(suite, &key).unwrap(),
        )
    }

    #[test]
    fn test_construct_nonce_gcm() {
        let nonce = construct_nonce(12, 0x0102030405060708u64.to_be_bytes());
        assert_eq!(&nonce[..4], &[0, 0, 0, 0]);
        assert_eq!(&nonce[4..12], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_construct_nonce_xchacha() {
        let nonce = construct_nonce(24, 1u64.to_be_bytes());
        assert_eq!(&nonce[..16], &[0u8; 16]);
        assert_eq!(&nonce[16..24], &[0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_seal_open_all_suites() {
        for suite in [
            AeadSuite::Aes128Gcm,
            AeadSuite::Aes256Gcm,
            AeadSuite::ChaCha20Poly1305,
        ] {
            let (sealer, opener) = pair(suite);
            let record = sealer.seal(b"payload", [0xAB, 0xCD]).unwrap();
            let view = RecordView::parse(&record).unwrap();
            assert_eq!(view.aad, [0xAB, 0xCD]);
            assert_eq!(view.counter(), 1);

            let plaintext = opener
                .open(view.aad, view.nonce_tail, view.ciphertext)
                .unwrap();
            assert_eq!(plaintext, b"payload");
        }
    }

    #[test]
    fn test_nonce_lengths() {
        assert_eq!(pair(AeadSuite::Aes128Gcm).0.nonce_len(), 12);
        assert_eq!(pair(AeadSuite::ChaCha20Poly1305).1.nonce_len(), 24);
    }

    #[test]
    fn test_wrong_aad_fails() {
        let (sealer, opener) = pair(AeadSuite::Aes256Gcm);
        let record = sealer.seal(b"payload", [0, 1]).unwrap();
        let view = RecordView::parse(&record).unwrap();
        assert!(matches!(
            opener.open([0, 2], view.nonce_tail, view.ciphertext),
            Err(CryptoError::AuthFailure)
        ));
    }

    #[test]
    fn test_wrong_counter_fails() {
        let (sealer, opener) = pair(AeadSuite::ChaCha20Poly1305);
        let record = sealer.seal(b"payload", [0, 1]).unwrap();
        let view = RecordView::parse(&record).unwrap();
        assert!(matches!(
            opener.open(view.aad, 2u64.to_be_bytes(), view.ciphertext),
            Err(CryptoError::AuthFailure)
        ));
    }

    #[test]
    fn test_out_of_order_records_still_open() {
        let (sealer, opener) = pair(AeadSuite::Aes128Gcm);
        let first = sealer.seal(b"one", [0, 0]).unwrap();
        let second = sealer.seal(b"two", [0, 0]).unwrap();

        let second = RecordView::parse(&second).unwrap();
        assert!(opener.is_in_order(second.nonce_tail));
        assert_eq!(
            opener
                .open(second.aad, second.nonce_tail, second.ciphertext)
                .unwrap(),
            b"two"
        );

        let first = RecordView::parse(&first).unwrap();
        assert!(!opener.is_in_order(first.nonce_tail));
        assert_eq!(
            opener
                .open(first.aad, first.nonce_tail, first.ciphertext)
                .unwrap(),
            b"one"
        );
        assert_eq!(opener.counter(), 2);
    }

    #[test]
    fn test_counter_exhaustion() {
        let (sealer, _) = pair(AeadSuite::Aes256Gcm);
        sealer.set_counter(u64::MAX - 2);

        let record = sealer.seal(b"", [0, 0]).unwrap();
        assert_eq!(RecordView::parse(&record).unwrap().counter(), u64::MAX - 1);

        let record = sealer.seal(b"", [0, 0]).unwrap();
        assert_eq!(RecordView::parse(&record).unwrap().counter(), u64::MAX);

        assert!(matches!(
            sealer.seal(b"", [0, 0]),
            Err(CryptoError::CounterExhausted)
        ));
        assert_eq!(sealer.counter(), u64::MAX);
    }

    #[test]
    fn test_concurrent_seals_use_distinct_counters() {
        let (sealer, _) = pair(AeadSuite::Aes256Gcm);
        let mut counters: Vec<u64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        (0..250)
                            .map(|_| {
                                let record = sealer.seal(b"x", [0, 0]).unwrap();
                                RecordView::parse(&record).unwrap().counter()
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        counters.sort_unstable();
        counters.dedup();
        assert_eq!(counters.len(), 1000);
        assert_eq!(counters.first(), Some(&1));
        assert_eq!(counters.last(), Some(&1000));
    }
}
