//! Record layout and handshake envelope definitions

use serde::{Deserialize, Serialize};

use crate::{
    AAD_SIZE, AeadSuite, Curve, MIN_RECORD_SIZE, NONCE_TAIL_SIZE, PROTOCOL_VERSION,
    ProtocolError, ProtocolResult, RECORD_HEADER_SIZE,
};

/// Borrowed view of one sealed record
///
/// Layout: `aad[2] || nonce_tail[8] || ciphertext || tag[16]`. Records carry
/// no length prefix; delimiting them is the transport's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordView<'a> {
    pub aad: [u8; AAD_SIZE],
    pub nonce_tail: [u8; NONCE_TAIL_SIZE],
    pub ciphertext: &'a [u8],
}

impl<'a> RecordView<'a> {
    /// Slice a received record into its three fields
    pub fn parse(record: &'a [u8]) -> ProtocolResult<Self> {
        if record.len() < MIN_RECORD_SIZE {
            return Err(ProtocolError::RecordTooShort {
                size: record.len(),
                min: MIN_RECORD_SIZE,
            });
        }

        let mut aad = [0u8; AAD_SIZE];
        aad.copy_from_slice(&record[..AAD_SIZE]);
        let mut nonce_tail = [0u8; NONCE_TAIL_SIZE];
        nonce_tail.copy_from_slice(&record[AAD_SIZE..RECORD_HEADER_SIZE]);

        Ok(Self {
            aad,
            nonce_tail,
            ciphertext: &record[RECORD_HEADER_SIZE..],
        })
    }

    /// Sender counter carried in the nonce tail
    pub fn counter(&self) -> u64 {
        u64::from_be_bytes(self.nonce_tail)
    }
}

/// Assemble a record from its fields
pub fn encode_record(
    aad: [u8; AAD_SIZE],
    nonce_tail: [u8; NONCE_TAIL_SIZE],
    ciphertext: &[u8],
) -> Vec<u8> {
    let mut record = Vec::with_capacity(RECORD_HEADER_SIZE + ciphertext.len());
    record.extend_from_slice(&aad);
    record.extend_from_slice(&nonce_tail);
    record.extend_from_slice(ciphertext);
    record
}

/// Content a peer may sign before handing its public key to the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub version: u32,
    pub curve: Curve,
    pub suite: AeadSuite,
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
    /// Seconds since the Unix epoch at signing time
    pub timestamp: u64,
}

impl HandshakePayload {
    pub fn new(curve: Curve, suite: AeadSuite, public_key: Vec<u8>, timestamp: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            curve,
            suite,
            public_key,
            timestamp,
        }
    }

    /// JSON encoding, which is exactly what gets signed
    pub fn to_bytes(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> ProtocolResult<Self> {
        let payload: Self = serde_json::from_slice(data)?;
        if payload.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: payload.version,
            });
        }
        Ok(payload)
    }
}

/// Signed handshake envelope: `{"Signature": .., "Payload": ..}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    #[serde(rename = "Signature", with = "serde_bytes")]
    pub signature: Vec<u8>,
    #[serde(rename = "Payload", with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl SignedEnvelope {
    pub fn to_bytes(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

mod serde_bytes {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        serde::Deserialize::deserialize(deserializer)
    }
}
