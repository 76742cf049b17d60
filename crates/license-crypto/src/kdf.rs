//! # PBKDF2-HMAC-SHA256 Key Derivation
//!
//! Used by `OrgKeyVault` to derive the AES-256-GCM key that seals an
//! organization's private signing key, from an operator-supplied password
//! and a fresh random salt.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Minimum password length enforced before PBKDF2 ever runs — the Go
/// original validates this at the same boundary.
pub const MIN_PASSWORD_LEN: usize = 16;

/// Derived-key length, in bytes.
pub const DERIVED_KEY_LEN: usize = 32;

/// Default iteration count.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// A derived key. `Drop` zeroes the buffer.
pub struct DerivedKey(Vec<u8>);

impl DerivedKey {
    /// Borrow the derived key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Validate a password meets the minimum length before it is used.
pub fn validate_password(password: &str) -> Result<(), CryptoError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(CryptoError::InvalidKeyMaterial(format!(
            "password must be at least {MIN_PASSWORD_LEN} bytes, got {}",
            password.len()
        )));
    }
    Ok(())
}

/// Derive a 256-bit key from `password` and `salt` using PBKDF2-HMAC-SHA256.
pub fn pbkdf2(password: &str, salt: &[u8], iterations: u32) -> DerivedKey {
    let mut out = vec![0u8; DERIVED_KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    DerivedKey(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_32_byte_key() {
        let key = pbkdf2("a very long password indeed", b"salt-bytes-here", 1_000);
        assert_eq!(key.as_bytes().len(), 32);
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let k1 = pbkdf2("a very long password indeed", b"fixed-salt", 1_000);
        let k2 = pbkdf2("a very long password indeed", b"fixed-salt", 1_000);
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn different_salt_yields_different_key() {
        let k1 = pbkdf2("a very long password indeed", b"salt-one", 1_000);
        let k2 = pbkdf2("a very long password indeed", b"salt-two", 1_000);
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn short_password_rejected() {
        assert!(validate_password("short").is_err());
    }

    #[test]
    fn sixteen_byte_password_accepted() {
        assert!(validate_password("1234567890123456").is_ok());
    }
}
