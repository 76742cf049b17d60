//! # HMAC-SHA256 MAC
//!
//! Used both as the `LicenseFile` integrity tag (keyed by the KMS master
//! key) and, generically, as the `hmac_sha256` primitive spec names.
//! Verification always runs through [`verify`], which compares in
//! constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Compute an HMAC-SHA256 tag (32 bytes) over `message` under `key_32`.
pub fn hmac_sha256(key_32: &[u8], message: &[u8]) -> Result<[u8; 32], CryptoError> {
    if key_32.len() != 32 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 32,
            actual: key_32.len(),
        });
    }
    let mut mac =
        HmacSha256::new_from_slice(key_32).map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
    mac.update(message);
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    Ok(out)
}

/// Verify a presented tag against a freshly computed one, in constant time.
pub fn verify(key_32: &[u8], message: &[u8], tag: &[u8]) -> Result<bool, CryptoError> {
    let expected = hmac_sha256(key_32, message)?;
    Ok(constant_time_eq(&expected, tag))
}

/// Constant-time byte-slice comparison. Returns `false` immediately (no
/// comparison performed) when lengths differ, which does not leak timing
/// information about the content since the lengths of both a MAC tag and
/// a signature are public, fixed protocol constants.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_32_bytes() {
        let tag = hmac_sha256(&[7u8; 32], b"license file bytes").unwrap();
        assert_eq!(tag.len(), 32);
    }

    #[test]
    fn bit_identical_inputs_produce_bit_identical_tags() {
        let t1 = hmac_sha256(&[1u8; 32], b"same message").unwrap();
        let t2 = hmac_sha256(&[1u8; 32], b"same message").unwrap();
        assert_eq!(t1, t2);
    }

    #[test]
    fn different_message_produces_different_tag() {
        let t1 = hmac_sha256(&[1u8; 32], b"message a").unwrap();
        let t2 = hmac_sha256(&[1u8; 32], b"message b").unwrap();
        assert_ne!(t1, t2);
    }

    #[test]
    fn verify_roundtrip() {
        let tag = hmac_sha256(&[9u8; 32], b"payload").unwrap();
        assert!(verify(&[9u8; 32], b"payload", &tag).unwrap());
    }

    #[test]
    fn verify_fails_on_tampered_message() {
        let tag = hmac_sha256(&[9u8; 32], b"payload").unwrap();
        assert!(!verify(&[9u8; 32], b"payload-tampered", &tag).unwrap());
    }

    #[test]
    fn wrong_key_length_rejected() {
        assert!(hmac_sha256(&[0u8; 16], b"x").is_err());
    }

    #[test]
    fn constant_time_eq_matches_equality() {
        assert!(constant_time_eq(b"abcd", b"abcd"));
        assert!(!constant_time_eq(b"abcd", b"abce"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
