//! Optional RSA-signed handshake envelope
//!
//! An outer layer may wrap the raw public key in a signed envelope before
//! handing it to the peer. The session itself never looks at signatures.

use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use shared_protocol::{HandshakePayload, SignedEnvelope};

use crate::{CryptoError, CryptoResult};

/// Sign a payload (RSA PKCS#1 v1.5 over SHA-256) and return the JSON envelope
pub fn sign_handshake(key: &RsaPrivateKey, payload: &HandshakePayload) -> CryptoResult<Vec<u8>> {
    let payload = payload.to_bytes()?;
    let signing_key = SigningKey::<Sha256>::new(key.clone());
    let signature = signing_key
        .try_sign(&payload)
        .map_err(|e| CryptoError::Signature(e.to_string()))?;

    let envelope = SignedEnvelope {
        signature: signature.to_vec(),
        payload,
    };
    Ok(envelope.to_bytes()?)
}

/// Check an envelope's signature and decode its payload
pub fn verify_handshake(key: &RsaPublicKey, envelope: &[u8]) -> CryptoResult<HandshakePayload> {
    let envelope = SignedEnvelope::from_bytes(envelope)?;
    let signature = Signature::try_from(envelope.signature.as_slice())
        .map_err(|e| CryptoError::Signature(e.to_string()))?;

    VerifyingKey::<Sha256>::new(key.clone())
        .verify(&envelope.payload, &signature)
        .map_err(|e| CryptoError::Signature(e.to_string()))?;

    Ok(HandshakePayload::from_bytes(&envelope.payload)?)
}
