//! # AES-256-GCM Envelope Sealing
//!
//! Two envelope formats share this primitive:
//! - KMS key material: `nonce(12) || ciphertext_and_tag` (no salt — the
//!   master key is the KDF-less root of that envelope).
//! - Org signing-key material: `salt(32) || nonce(12) || ciphertext_and_tag`,
//!   where the salt feeds [`crate::kdf::pbkdf2`] before sealing (see
//!   [`crate::kdf`]).
//!
//! This module only deals with the inner `nonce || ciphertext_and_tag`
//! layer; callers that need a salt prefix it themselves.

use aes_gcm::aead::{Aead, KeyInit, OsRng as AeadOsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand_core::RngCore;
use zeroize::Zeroize;

use crate::error::CryptoError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Seal `plaintext` under a 32-byte key, returning `nonce(12) || ct_and_tag`.
pub fn seal(key_32: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key_32.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key_32.len(),
        });
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_32));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    AeadOsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ct = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::SealFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Open `nonce(12) || ct_and_tag` under a 32-byte key. Fails on any
/// tampering of the sealed bytes (wrong tag) or truncation.
pub fn open(key_32: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key_32.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key_32.len(),
        });
    }
    if sealed.len() < NONCE_LEN {
        return Err(CryptoError::OpenFailed(format!(
            "sealed payload too short: {} bytes, need at least {}",
            sealed.len(),
            NONCE_LEN
        )));
    }
    let (nonce_bytes, ct) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_32));
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ct)
        .map_err(|e| CryptoError::OpenFailed(e.to_string()))
}

/// Zeroize a plaintext buffer in place. Thin wrapper kept so every call
/// site that must zero a decrypted buffer reads the same way.
pub fn zero(buf: &mut [u8]) {
    buf.zeroize();
}
