//! Cryptographic session: key agreement, key schedule and sealed records

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::SystemTime;

use parking_lot::RwLock;
use shared_protocol::{
    AAD_SIZE, AeadSuite, Curve, NONCE_TAIL_SIZE, RecordView, SessionId, SessionRole,
    SessionState,
};
use tracing::{debug, info, warn};

use crate::{
    CryptoError, CryptoResult, CurveAgent, KeySchedule, Opener, PeerPublicKey,
    Sealer, parse_public,
};

/// Both record directions, armed once both public keys are known
struct Directions {
    sealer: Sealer,
    opener: Opener,
}

/// One peer's end of a sealed duplex session
///
/// Lifecycle: `Fresh -> PubExchanged -> Open -> Closed`. Handshake steps take
/// `&mut self`; [`seal`](Self::seal) and [`open`](Self::open) take `&self`
/// and only share a read lock, so one thread may seal while another opens.
/// Any error closes the session and drops the derived keys, even when the
/// session is only reachable through a shared reference.
pub struct Session {
    id: SessionId,
    role: SessionRole,
    curve: Curve,
    suite: AeadSuite,
    created_at: SystemTime,
    state: AtomicU8,
    public_key: Vec<u8>,
    agent: Option<CurveAgent>,
    remote_public: Option<PeerPublicKey>,
    directions: RwLock<Option<Directions>>,
}

impl Session {
    /// Create a session and its ephemeral key pair
    ///
    /// The cleartext suite is refused here.
    pub fn new(role: SessionRole, curve: Curve, suite: AeadSuite) -> CryptoResult<Self> {
        if !suite.is_encrypting() {
            return Err(CryptoError::UnsupportedSuite(suite));
        }

        let id = SessionId::new();
        let agent = CurveAgent::generate(curve);
        debug!(session = %id.short(), ?role, %curve, %suite, "Session created");

        Ok(Self {
            id,
            role,
            curve,
            suite,
            created_at: SystemTime::now(),
            state: AtomicU8::new(SessionState::Fresh as u8),
            public_key: agent.public_key_bytes().to_vec(),
            agent: Some(agent),
            remote_public: None,
            directions: RwLock::new(None),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn suite(&self) -> AeadSuite {
        self.suite
    }

    /// Construction time; advisory, for lifetime policies outside the session
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Local ephemeral public key for the wire (empty once closed)
    pub fn public_key_bytes(&self) -> &[u8] {
        if self.state().is_closed() {
            &[]
        } else {
            &self.public_key
        }
    }

    /// Last send counter used
    pub fn send_counter(&self) -> u64 {
        self.directions
            .read()
            .as_ref()
            .map_or(0, |d| d.sealer.counter())
    }

    /// Highest receive counter accepted; advisory
    pub fn recv_counter(&self) -> u64 {
        self.directions
            .read()
            .as_ref()
            .map_or(0, |d| d.opener.counter())
    }

    /// Accept the peer's raw public key. Allowed once, from `Fresh`.
    pub fn set_remote_public(&mut self, bytes: &[u8]) -> CryptoResult<()> {
        let result = self.try_set_remote_public(bytes);
        self.close_on_error(result)
    }

    fn try_set_remote_public(&mut self, bytes: &[u8]) -> CryptoResult<()> {
        self.check_transition(SessionState::PubExchanged)?;

        let expected = self.curve.public_key_len();
        if bytes.len() != expected {
            return Err(CryptoError::HandshakeFraming {
                expected,
                actual: bytes.len(),
            });
        }

        self.remote_public = Some(parse_public(self.curve, bytes)?);
        self.advance(SessionState::PubExchanged)
    }

    /// Run ECDH and the key schedule, arming both directions
    ///
    /// The ephemeral private key is dropped once the shared secret exists.
    pub fn derive_keys(&mut self) -> CryptoResult<()> {
        let result = self.try_derive_keys();
        self.close_on_error(result)
    }

    fn try_derive_keys(&mut self) -> CryptoResult<()> {
        self.check_transition(SessionState::Open)?;

        let (agent, remote) = match (self.agent.as_ref(), self.remote_public.as_ref()) {
            (Some(agent), Some(remote)) => (agent, remote),
            _ => return Err(CryptoError::SessionClosed),
        };

        let raw_shared = agent.compute_shared(remote)?;
        let schedule = KeySchedule::new(&raw_shared);
        let keys = schedule.derive(self.suite, self.role)?;
        let sealer = Sealer::new(self.suite, &keys.tx)?;
        let opener = Opener::new(self.suite, &keys.rx)?;

        *self.directions.get_mut() = Some(Directions { sealer, opener });
        self.agent = None;
        self.remote_public = None;
        self.advance(SessionState::Open)?;

        info!(session = %self.id.short(), role = ?self.role, "Session keys derived");
        Ok(())
    }

    /// Seal one record: `aad || nonce_tail || ciphertext || tag`
    pub fn seal(&self, plaintext: &[u8], aad: [u8; AAD_SIZE]) -> CryptoResult<Vec<u8>> {
        self.ready()?;
        let result = match self.directions.read().as_ref() {
            Some(directions) => directions.sealer.seal(plaintext, aad),
            None => return Err(CryptoError::SessionClosed),
        };
        result.inspect_err(|e| {
            warn!(session = %self.id.short(), "Seal failed: {}", e);
            self.abort();
        })
    }

    /// Open one record from its already-sliced fields
    ///
    /// Failure reasons are never distinguished: any problem with the key,
    /// counter, AAD, ciphertext or tag is [`CryptoError::AuthFailure`].
    pub fn open(
        &self,
        aad: [u8; AAD_SIZE],
        nonce_tail: [u8; NONCE_TAIL_SIZE],
        ciphertext_and_tag: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        self.ready()?;
        let result = match self.directions.read().as_ref() {
            Some(directions) => directions.opener.open(aad, nonce_tail, ciphertext_and_tag),
            None => return Err(CryptoError::SessionClosed),
        };
        result.inspect_err(|_| {
            warn!(session = %self.id.short(), "Record authentication failed");
            self.abort();
        })
    }

    /// Slice a whole record and open it
    pub fn open_record(&self, record: &[u8]) -> CryptoResult<Vec<u8>> {
        self.ready()?;
        match RecordView::parse(record) {
            Ok(view) => self.open(view.aad, view.nonce_tail, view.ciphertext),
            Err(_) => {
                warn!(session = %self.id.short(), "Truncated record");
                self.abort();
                Err(CryptoError::AuthFailure)
            }
        }
    }

    /// Whether a received tail is ahead of everything accepted so far
    pub fn is_in_order(&self, nonce_tail: [u8; NONCE_TAIL_SIZE]) -> bool {
        self.directions
            .read()
            .as_ref()
            .is_some_and(|d| d.opener.is_in_order(nonce_tail))
    }

    /// Close through a shared reference
    ///
    /// Moves to `Closed` and drops the derived keys. Used when the session is
    /// shared between a sender and a receiver and either side fails.
    pub fn abort(&self) {
        let previous = self.state.swap(SessionState::Closed as u8, Ordering::AcqRel);
        let directions = self.directions.write().take();
        if directions.is_some() || SessionState::from_u8(previous) != SessionState::Closed {
            debug!(session = %self.id.short(), "Session aborted");
        }
    }

    /// Move to `Closed` and drop all key material. Idempotent.
    pub fn close(&mut self) {
        let previous = self.state.swap(SessionState::Closed as u8, Ordering::AcqRel);
        let had_material = self.agent.is_some() || self.directions.get_mut().is_some();

        *self.directions.get_mut() = None;
        self.remote_public = None;
        self.agent = None;

        if had_material || SessionState::from_u8(previous) != SessionState::Closed {
            debug!(session = %self.id.short(), "Session closed");
        }
    }

    /// Records may only flow while `Open`
    fn ready(&self) -> CryptoResult<()> {
        match self.state() {
            SessionState::Open => Ok(()),
            SessionState::Closed => Err(CryptoError::SessionClosed),
            state => {
                self.abort();
                Err(CryptoError::invalid_state(state, SessionState::Open))
            }
        }
    }

    fn check_transition(&self, next: SessionState) -> CryptoResult<SessionState> {
        let current = self.state();
        current
            .transition(next)
            .map_err(|_| CryptoError::invalid_state(current, next))
    }

    fn advance(&self, next: SessionState) -> CryptoResult<()> {
        let next = self.check_transition(next)?;
        self.state.store(next as u8, Ordering::Release);
        debug!(session = %self.id.short(), state = ?next, "Session state changed");
        Ok(())
    }

    fn close_on_error<T>(&mut self, result: CryptoResult<T>) -> CryptoResult<T> {
        if let Err(e) = &result {
            warn!(session = %self.id.short(), "Session failed: {}", e);
            self.close();
        }
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("curve", &self.curve)
            .field("suite", &self.suite)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_protocol::{MIN_RECORD_SIZE, TAG_SIZE};

    const SUITES: [AeadSuite; 3] = [
        AeadSuite::Aes128Gcm,
        AeadSuite::Aes256Gcm,
        AeadSuite::ChaCha20Poly1305,
    ];

    fn open_pair(curve: Curve, suite: AeadSuite) -> (Session, Session) {
        let mut initiator = Session::new(SessionRole::Initiator, curve, suite).unwrap();
        let mut responder = Session::new(SessionRole::Responder, curve, suite).unwrap();

        let initiator_public = initiator.public_key_bytes().to_vec();
        let responder_public = responder.public_key_bytes().to_vec();

        initiator.set_remote_public(&responder_public).unwrap();
        responder.set_remote_public(&initiator_public).unwrap();
        initiator.derive_keys().unwrap();
        responder.derive_keys().unwrap();

        (initiator, responder)
    }

    fn transfer(from: &Session, to: &Session, plaintext: &[u8], aad: [u8; 2]) -> Vec<u8> {
        let record = from.seal(plaintext, aad).unwrap();
        to.open_record(&record).unwrap()
    }

    #[test]
    fn test_handshake_and_encryption() {
        let (a, b) = open_pair(Curve::X25519, AeadSuite::Aes256Gcm);
        assert_eq!(a.state(), SessionState::Open);

        let record = a.seal(b"hello", [0x00, 0x01]).unwrap();
        assert_eq!(record.len(), 2 + 8 + 5 + 16);
        assert_eq!(b.open_record(&record).unwrap(), b"hello");

        assert_eq!(transfer(&b, &a, b"world", [0x00, 0x02]), b"world");
    }

    #[test]
    fn test_directional_keys_cross() {
        for curve in [Curve::X25519, Curve::P521] {
            for suite in SUITES {
                let (a, b) = open_pair(curve, suite);
                let own = a.seal(b"mine", [0, 0]).unwrap();
                assert_eq!(b.open_record(&own).unwrap(), b"mine");

                // A session cannot open what it sealed itself
                let (c, _) = open_pair(curve, suite);
                let looped = c.seal(b"loop", [0, 0]).unwrap();
                assert!(matches!(
                    c.open_record(&looped),
                    Err(CryptoError::AuthFailure)
                ));
            }
        }
    }

    #[test]
    fn test_roundtrip_all_suites_and_curves() {
        for curve in [Curve::X25519, Curve::P521] {
            for suite in SUITES {
                let (a, b) = open_pair(curve, suite);
                assert_eq!(transfer(&a, &b, b"ping", [1, 2]), b"ping");
                assert_eq!(transfer(&b, &a, b"pong", [3, 4]), b"pong");
            }
        }
    }

    #[test]
    fn test_payload_sizes() {
        let (a, b) = open_pair(Curve::X25519, AeadSuite::ChaCha20Poly1305);
        for size in [0usize, 10, 100, 1000, 10_000, 100_000] {
            let plaintext: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let record = a.seal(&plaintext, [0, 0]).unwrap();
            assert_eq!(record.len(), size + MIN_RECORD_SIZE);
            assert_eq!(b.open_record(&record).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_every_aad_value() {
        let (a, b) = open_pair(Curve::X25519, AeadSuite::Aes128Gcm);
        for value in 0..=u16::MAX {
            let aad = value.to_be_bytes();
            assert!(transfer(&a, &b, b"", aad).is_empty());
        }
        assert_eq!(a.send_counter(), 65_536);
        assert_eq!(b.recv_counter(), 65_536);
    }

    #[test]
    fn test_any_bit_flip_is_rejected() {
        let (a, _) = open_pair(Curve::X25519, AeadSuite::Aes256Gcm);
        let record = a.seal(b"hello", [0x00, 0x01]).unwrap();

        for byte in 0..record.len() {
            for bit in 0..8 {
                // A fresh receiver per flip, since a failure closes it
                let (sender, receiver) = open_pair(Curve::X25519, AeadSuite::Aes256Gcm);
                let mut tampered = sender.seal(b"hello", [0x00, 0x01]).unwrap();
                tampered[byte] ^= 1 << bit;
                assert!(matches!(
                    receiver.open_record(&tampered),
                    Err(CryptoError::AuthFailure)
                ));
                assert_eq!(receiver.state(), SessionState::Closed);
            }
        }
    }

    #[test]
    fn test_tamper_closes_session() {
        let (a, b) = open_pair(Curve::X25519, AeadSuite::Aes256Gcm);
        let mut record = a.seal(b"hello", [0x00, 0x01]).unwrap();
        record[15] ^= 0x01;

        assert!(matches!(b.open_record(&record), Err(CryptoError::AuthFailure)));
        assert_eq!(b.state(), SessionState::Closed);
        assert!(b.directions.read().is_none());

        let fresh = a.seal(b"hello", [0x00, 0x01]).unwrap();
        assert!(matches!(b.open_record(&fresh), Err(CryptoError::SessionClosed)));
        assert!(matches!(b.seal(b"x", [0, 0]), Err(CryptoError::SessionClosed)));
    }

    #[test]
    fn test_truncated_record_is_auth_failure() {
        let (a, b) = open_pair(Curve::X25519, AeadSuite::Aes256Gcm);
        let record = a.seal(b"", [0, 0]).unwrap();
        assert_eq!(record.len(), 10 + TAG_SIZE);
        assert!(matches!(
            b.open_record(&record[..record.len() - 1]),
            Err(CryptoError::AuthFailure)
        ));
    }

    #[test]
    fn test_suite_mismatch_fails_first_open() {
        let mut a = Session::new(SessionRole::Initiator, Curve::X25519, AeadSuite::Aes256Gcm).unwrap();
        let mut b = Session::new(
            SessionRole::Responder,
            Curve::X25519,
            AeadSuite::ChaCha20Poly1305,
        )
        .unwrap();
        let a_public = a.public_key_bytes().to_vec();
        let b_public = b.public_key_bytes().to_vec();
        a.set_remote_public(&b_public).unwrap();
        b.set_remote_public(&a_public).unwrap();
        a.derive_keys().unwrap();
        b.derive_keys().unwrap();

        let record = a.seal(b"x", [0, 0]).unwrap();
        assert!(matches!(b.open_record(&record), Err(CryptoError::AuthFailure)));
    }

    #[test]
    fn test_same_role_on_both_sides_fails() {
        let mut a = Session::new(SessionRole::Initiator, Curve::X25519, AeadSuite::Aes256Gcm).unwrap();
        let mut b = Session::new(SessionRole::Initiator, Curve::X25519, AeadSuite::Aes256Gcm).unwrap();
        let a_public = a.public_key_bytes().to_vec();
        let b_public = b.public_key_bytes().to_vec();
        a.set_remote_public(&b_public).unwrap();
        b.set_remote_public(&a_public).unwrap();
        a.derive_keys().unwrap();
        b.derive_keys().unwrap();

        let record = a.seal(b"x", [0, 0]).unwrap();
        assert!(matches!(b.open_record(&record), Err(CryptoError::AuthFailure)));
    }

    #[test]
    fn test_curve_mismatch_rejected() {
        let mut a = Session::new(SessionRole::Initiator, Curve::X25519, AeadSuite::Aes256Gcm).unwrap();
        let mut b = Session::new(SessionRole::Responder, Curve::P521, AeadSuite::Aes256Gcm).unwrap();
        let a_public = a.public_key_bytes().to_vec();
        let b_public = b.public_key_bytes().to_vec();

        assert!(matches!(
            a.set_remote_public(&b_public),
            Err(CryptoError::HandshakeFraming {
                expected: 32,
                actual: 133
            })
        ));
        assert!(matches!(
            b.set_remote_public(&a_public),
            Err(CryptoError::HandshakeFraming {
                expected: 133,
                actual: 32
            })
        ));
        assert_eq!(a.state(), SessionState::Closed);
        assert_eq!(b.state(), SessionState::Closed);
    }

    #[test]
    fn test_monotonic_nonce_tails() {
        let (a, _) = open_pair(Curve::X25519, AeadSuite::Aes256Gcm);
        let tails: Vec<u64> = (0..3)
            .map(|_| {
                let record = a.seal(b"m", [0, 0]).unwrap();
                RecordView::parse(&record).unwrap().counter()
            })
            .collect();
        assert_eq!(tails, vec![1, 2, 3]);
    }

    #[test]
    fn test_none_suite_rejected() {
        assert!(matches!(
            Session::new(SessionRole::Initiator, Curve::X25519, AeadSuite::None),
            Err(CryptoError::UnsupportedSuite(AeadSuite::None))
        ));
    }

    #[test]
    fn test_set_remote_public_twice_fails() {
        let mut a = Session::new(SessionRole::Initiator, Curve::X25519, AeadSuite::Aes256Gcm).unwrap();
        let b = Session::new(SessionRole::Responder, Curve::X25519, AeadSuite::Aes256Gcm).unwrap();
        let b_public = b.public_key_bytes().to_vec();

        a.set_remote_public(&b_public).unwrap();
        assert_eq!(a.state(), SessionState::PubExchanged);
        assert!(matches!(
            a.set_remote_public(&b_public),
            Err(CryptoError::InvalidState {
                from: SessionState::PubExchanged,
                ..
            })
        ));
        assert_eq!(a.state(), SessionState::Closed);
    }

    #[test]
    fn test_derive_before_remote_public_fails() {
        let mut a = Session::new(SessionRole::Initiator, Curve::X25519, AeadSuite::Aes256Gcm).unwrap();
        assert!(matches!(
            a.derive_keys(),
            Err(CryptoError::InvalidState {
                from: SessionState::Fresh,
                to: SessionState::Open
            })
        ));
    }

    #[test]
    fn test_no_data_before_open() {
        let a = Session::new(SessionRole::Initiator, Curve::X25519, AeadSuite::Aes256Gcm).unwrap();
        assert!(matches!(
            a.seal(b"early", [0, 0]),
            Err(CryptoError::InvalidState { .. })
        ));
        assert_eq!(a.state(), SessionState::Closed);
    }

    #[test]
    fn test_invalid_public_key_closes() {
        let mut a = Session::new(SessionRole::Initiator, Curve::X25519, AeadSuite::Aes256Gcm).unwrap();
        assert!(matches!(
            a.set_remote_public(&[0u8; 32]),
            Err(CryptoError::InvalidPublicKey(_))
        ));
        assert_eq!(a.state(), SessionState::Closed);
        assert!(a.public_key_bytes().is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut a, _) = open_pair(Curve::X25519, AeadSuite::Aes256Gcm);
        a.close();
        assert_eq!(a.state(), SessionState::Closed);
        assert!(a.directions.read().is_none() && a.agent.is_none());
        a.close();
        assert_eq!(a.state(), SessionState::Closed);
        assert!(matches!(a.seal(b"x", [0, 0]), Err(CryptoError::SessionClosed)));
    }

    #[test]
    fn test_counter_exhaustion_closes() {
        let (a, b) = open_pair(Curve::X25519, AeadSuite::Aes256Gcm);
        a.directions
            .read()
            .as_ref()
            .unwrap()
            .sealer
            .set_counter(u64::MAX - 2);

        let record = a.seal(b"last", [0, 0]).unwrap();
        assert_eq!(RecordView::parse(&record).unwrap().counter(), u64::MAX - 1);
        assert_eq!(b.open_record(&record).unwrap(), b"last");

        let record = a.seal(b"final", [0, 0]).unwrap();
        assert_eq!(RecordView::parse(&record).unwrap().counter(), u64::MAX);

        assert!(matches!(
            a.seal(b"overflow", [0, 0]),
            Err(CryptoError::CounterExhausted)
        ));
        assert_eq!(a.state(), SessionState::Closed);
    }

    #[test]
    fn test_seal_and_open_on_separate_threads() {
        let (a, b) = open_pair(Curve::X25519, AeadSuite::Aes256Gcm);
        let records: Vec<Vec<u8>> = (0..50u8).map(|i| b.seal(&[i], [0, 9]).unwrap()).collect();

        std::thread::scope(|s| {
            let sender = s.spawn(|| {
                (0..50u8)
                    .map(|i| a.seal(&[i; 3], [0, 1]).unwrap())
                    .collect::<Vec<_>>()
            });
            let receiver = s.spawn(|| {
                for (i, record) in records.iter().enumerate() {
                    assert_eq!(a.open_record(record).unwrap(), vec![i as u8]);
                }
            });
            receiver.join().unwrap();
            let sent = sender.join().unwrap();
            for (i, record) in sent.iter().enumerate() {
                assert_eq!(b.open_record(record).unwrap(), vec![i as u8; 3]);
            }
        });
    }

    #[test]
    fn test_private_key_dropped_once_open() {
        let (a, _) = open_pair(Curve::P521, AeadSuite::Aes256Gcm);
        assert!(a.agent.is_none() && a.remote_public.is_none());
        assert_eq!(a.public_key_bytes().len(), 133);
    }

    #[test]
    fn test_abort_through_shared_reference() {
        let (a, b) = open_pair(Curve::X25519, AeadSuite::ChaCha20Poly1305);
        let shared = std::sync::Arc::new(a);
        let record = b.seal(b"queued", [0, 0]).unwrap();

        let other = shared.clone();
        other.abort();
        assert_eq!(shared.state(), SessionState::Closed);
        assert!(shared.directions.read().is_none());
        assert!(shared.public_key_bytes().is_empty());
        assert_eq!(shared.send_counter(), 0);
        assert!(matches!(
            shared.open_record(&record),
            Err(CryptoError::SessionClosed)
        ));

        // Idempotent
        other.abort();
        assert_eq!(shared.state(), SessionState::Closed);
    }

    #[test]
    fn test_lifecycle_follows_transition_table() {
        let (mut a, _) = open_pair(Curve::X25519, AeadSuite::Aes256Gcm);
        assert!(matches!(
            a.derive_keys(),
            Err(CryptoError::InvalidState {
                from: SessionState::Open,
                to: SessionState::Open
            })
        ));
        assert_eq!(a.state(), SessionState::Closed);
    }
}
