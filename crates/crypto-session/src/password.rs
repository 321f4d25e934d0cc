//! Password-based blob encryption for data at rest
//!
//! Independent of sessions. Layout: `salt[16] || nonce[12] || ciphertext || tag[16]`,
//! key = PBKDF2-HMAC-SHA256(password, salt, 600 000 iterations), AES-256-GCM.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{CryptoError, CryptoResult, TAG_SIZE};

pub const PBKDF2_ITERATIONS: u32 = 600_000;
pub const PASSWORD_SALT_SIZE: usize = 16;
pub const PASSWORD_NONCE_SIZE: usize = 12;

const HEADER_SIZE: usize = PASSWORD_SALT_SIZE + PASSWORD_NONCE_SIZE;

fn derive_key(password: &str, salt: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key[..]);
    key
}

/// Encrypt `plaintext` under `password` with a fresh salt and nonce
pub fn encrypt_with_password(plaintext: &[u8], password: &str) -> CryptoResult<Vec<u8>> {
    let mut salt = [0u8; PASSWORD_SALT_SIZE];
    let mut nonce = [0u8; PASSWORD_NONCE_SIZE];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| CryptoError::SealFailure)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::SealFailure)?;

    let mut blob = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a blob produced by [`encrypt_with_password`]
pub fn decrypt_with_password(blob: &[u8], password: &str) -> CryptoResult<Vec<u8>> {
    if blob.len() < HEADER_SIZE + TAG_SIZE {
        return Err(CryptoError::MalformedCiphertext(blob.len()));
    }

    let (salt, rest) = blob.split_at(PASSWORD_SALT_SIZE);
    let (nonce, ciphertext) = rest.split_at(PASSWORD_NONCE_SIZE);

    let key = derive_key(password, salt);
    let cipher =
        Aes256Gcm::new_from_slice(&key[..]).map_err(|_| CryptoError::PasswordDecryption)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::PasswordDecryption)
}
