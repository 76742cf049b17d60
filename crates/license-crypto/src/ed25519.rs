//! # Ed25519 Signing and Verification
//!
//! Ed25519 is used for KMS-resident asymmetric keys: a 32-byte public key,
//! a 64-byte expanded private key (seed‖public), and a 64-byte signature.
//!
//! ## Security Invariant
//!
//! Signing operations take [`CanonicalBytes`] so the signed payload is
//! always the output of the canonicalization pipeline — you cannot sign
//! raw bytes with this API.
//!
//! ## Wire encoding
//!
//! Public keys and signatures serialize as base64-std strings, matching
//! every other binary field on the wire.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signer, Verifier};
use license_core::CanonicalBytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

use crate::error::CryptoError;

fn decode_base64(s: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64
        .decode(s.trim())
        .map_err(|e| CryptoError::Base64Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Ed25519Signature
// ---------------------------------------------------------------------------

/// An Ed25519 digital signature (64 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ed25519Signature([u8; 64]);

impl Ed25519Signature {
    /// Construct from raw 64-byte signature.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Construct from a byte slice, validating length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidSignatureLength { expected: 64, actual: bytes.len() })?;
        Ok(Self(arr))
    }

    /// Access the raw 64-byte signature value.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Encode the signature as base64-std.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Decode a signature from base64-std.
    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        let bytes = decode_base64(s)?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for Ed25519Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Ed25519Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// SigningKey
// ---------------------------------------------------------------------------

/// An Ed25519 signing (private) key.
///
/// This type intentionally does **not** implement `Serialize`. Use
/// [`SigningKey::to_bytes`] for explicit key export when required, and
/// wrap the result in the caller's own envelope-encryption step before it
/// ever touches storage.
pub struct SigningKey {
    inner: ed25519_dalek::SigningKey,
}

impl SigningKey {
    /// Generate a new random Ed25519 signing key.
    pub fn generate<R: rand_core::CryptoRngCore>(csprng: &mut R) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::generate(csprng),
        }
    }

    /// Construct from raw 32-byte private key material.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    /// Derive the corresponding public verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Sign canonicalized data.
    pub fn sign(&self, data: &CanonicalBytes) -> Ed25519Signature {
        let sig = self.inner.sign(data.as_bytes());
        Ed25519Signature(sig.to_bytes())
    }

    /// Export the raw 32-byte private key material.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Export the 64-byte expanded form (seed‖public) used as the
    /// `KMSKey` asymmetric material on the wire.
    pub fn to_expanded_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.to_bytes());
        out[32..].copy_from_slice(&self.verifying_key().as_bytes());
        out
    }

    /// Reconstruct from the 64-byte expanded form, validating that the
    /// trailing 32 bytes are in fact the public key derived from the seed.
    pub fn from_expanded_bytes(bytes: &[u8; 64]) -> Result<Self, CryptoError> {
        let seed: [u8; 32] = bytes[..32].try_into().expect("slice is 32 bytes");
        let key = Self::from_bytes(&seed);
        if key.verifying_key().as_bytes() != bytes[32..] {
            return Err(CryptoError::InvalidKeyMaterial(
                "expanded Ed25519 key's trailing 32 bytes do not match the derived public key"
                    .to_string(),
            ));
        }
        Ok(key)
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("public", &self.verifying_key().to_base64())
            .finish()
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        let mut key_bytes = self.inner.to_bytes();
        key_bytes.zeroize();
        self.inner = ed25519_dalek::SigningKey::from_bytes(&[0u8; 32]);
    }
}

// ---------------------------------------------------------------------------
// VerifyingKey
// ---------------------------------------------------------------------------

/// An Ed25519 verifying (public) key.
#[derive(Debug, Clone)]
pub struct VerifyingKey {
    inner: ed25519_dalek::VerifyingKey,
}

impl VerifyingKey {
    /// Construct from raw 32-byte public key.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let inner = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Construct from a base64-std string (32 bytes decoded).
    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        let bytes = decode_base64(s)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            CryptoError::InvalidPublicKey(format!("expected 32 bytes, got {}", v.len()))
        })?;
        Self::from_bytes(&arr)
    }

    /// Access the raw 32-byte public key value.
    pub fn as_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Encode the public key as base64-std.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.inner.to_bytes())
    }

    /// Verify an Ed25519 signature over canonicalized data.
    pub fn verify(
        &self,
        data: &CanonicalBytes,
        signature: &Ed25519Signature,
    ) -> Result<(), CryptoError> {
        let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
        self.inner
            .verify(data.as_bytes(), &sig)
            .map_err(|e| CryptoError::VerificationFailed(e.to_string()))
    }
}

impl PartialEq for VerifyingKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for VerifyingKey {}

impl Serialize for VerifyingKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for VerifyingKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Convenience functions
// ---------------------------------------------------------------------------

/// Sign canonical bytes with a signing key, returning the signature.
pub fn sign(key: &SigningKey, data: &CanonicalBytes) -> Ed25519Signature {
    key.sign(data)
}

/// Verify a signature over canonical bytes using a verifying key.
pub fn verify(
    key: &VerifyingKey,
    data: &CanonicalBytes,
    signature: &Ed25519Signature,
) -> Result<(), CryptoError> {
    key.verify(data, signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;
    use serde_json::json;

    #[test]
    fn keypair_generation_produces_valid_keys() {
        let sk = SigningKey::generate(&mut OsRng);
        let vk = sk.verifying_key();
        assert_eq!(vk.as_bytes().len(), 32);
        assert_eq!(sk.to_bytes().len(), 32);
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let sk = SigningKey::generate(&mut OsRng);
        let vk = sk.verifying_key();

        let data = CanonicalBytes::new(&json!({"action": "transfer", "amount": 1000})).unwrap();
        let sig = sk.sign(&data);

        assert!(vk.verify(&data, &sig).is_ok());
    }

    #[test]
    fn verification_fails_with_wrong_key() {
        let sk1 = SigningKey::generate(&mut OsRng);
        let sk2 = SigningKey::generate(&mut OsRng);
        let vk2 = sk2.verifying_key();

        let data = CanonicalBytes::new(&json!({"msg": "hello"})).unwrap();
        let sig = sk1.sign(&data);

        assert!(vk2.verify(&data, &sig).is_err());
    }

    #[test]
    fn verification_fails_with_tampered_data() {
        let sk = SigningKey::generate(&mut OsRng);
        let vk = sk.verifying_key();

        let original = CanonicalBytes::new(&json!({"val": 42})).unwrap();
        let tampered = CanonicalBytes::new(&json!({"val": 43})).unwrap();
        let sig = sk.sign(&original);

        assert!(vk.verify(&original, &sig).is_ok());
        assert!(vk.verify(&tampered, &sig).is_err());
    }

    #[test]
    fn signature_base64_roundtrip() {
        let sk = SigningKey::generate(&mut OsRng);
        let data = CanonicalBytes::new(&json!({"key": "value"})).unwrap();
        let sig = sk.sign(&data);

        let encoded = sig.to_base64();
        let recovered = Ed25519Signature::from_base64(&encoded).unwrap();
        assert_eq!(sig, recovered);
    }

    #[test]
    fn verifying_key_base64_roundtrip() {
        let sk = SigningKey::generate(&mut OsRng);
        let vk = sk.verifying_key();

        let encoded = vk.to_base64();
        let recovered = VerifyingKey::from_base64(&encoded).unwrap();
        assert_eq!(vk, recovered);
    }

    #[test]
    fn signature_serde_roundtrip() {
        let sk = SigningKey::generate(&mut OsRng);
        let data = CanonicalBytes::new(&json!({"x": 1})).unwrap();
        let sig = sk.sign(&data);

        let json_str = serde_json::to_string(&sig).unwrap();
        let deserialized: Ed25519Signature = serde_json::from_str(&json_str).unwrap();
        assert_eq!(sig, deserialized);
    }

    #[test]
    fn verifying_key_serde_roundtrip() {
        let sk = SigningKey::generate(&mut OsRng);
        let vk = sk.verifying_key();

        let json_str = serde_json::to_string(&vk).unwrap();
        let deserialized: VerifyingKey = serde_json::from_str(&json_str).unwrap();
        assert_eq!(vk, deserialized);
    }

    #[test]
    fn signing_key_from_bytes_roundtrip() {
        let sk = SigningKey::generate(&mut OsRng);
        let bytes = sk.to_bytes();
        let sk2 = SigningKey::from_bytes(&bytes);
        assert_eq!(sk.verifying_key(), sk2.verifying_key());
    }

    #[test]
    fn expanded_bytes_roundtrip() {
        let sk = SigningKey::generate(&mut OsRng);
        let expanded = sk.to_expanded_bytes();
        let sk2 = SigningKey::from_expanded_bytes(&expanded).unwrap();
        assert_eq!(sk.verifying_key(), sk2.verifying_key());
    }

    #[test]
    fn expanded_bytes_rejects_mismatched_public_half() {
        let sk = SigningKey::generate(&mut OsRng);
        let mut expanded = sk.to_expanded_bytes();
        expanded[32] ^= 0xff;
        assert!(SigningKey::from_expanded_bytes(&expanded).is_err());
    }

    #[test]
    fn signing_key_debug_does_not_leak_private_key() {
        let sk = SigningKey::generate(&mut OsRng);
        let debug_str = format!("{sk:?}");
        assert!(debug_str.contains("SigningKey"));
        let private_b64 = BASE64.encode(sk.to_bytes());
        assert!(!debug_str.contains(&private_b64));
    }

    #[test]
    fn invalid_signature_length_rejected() {
        let result = Ed25519Signature::from_slice(&[0u8; 32]);
        assert!(result.is_err());
        match result.unwrap_err() {
            CryptoError::InvalidSignatureLength { actual, .. } => assert_eq!(actual, 32),
            other => panic!("expected InvalidSignatureLength, got: {other}"),
        }
    }

    #[test]
    fn free_functions_match_method_calls() {
        let sk = SigningKey::generate(&mut OsRng);
        let vk = sk.verifying_key();
        let data = CanonicalBytes::new(&json!({"test": true})).unwrap();

        let sig_method = sk.sign(&data);
        let sig_free = sign(&sk, &data);
        assert_eq!(sig_method, sig_free);

        assert!(verify(&vk, &data, &sig_method).is_ok());
    }

    #[test]
    fn deterministic_signing() {
        let sk = SigningKey::generate(&mut OsRng);
        let data = CanonicalBytes::new(&json!({"deterministic": true})).unwrap();
        let sig1 = sk.sign(&data);
        let sig2 = sk.sign(&data);
        assert_eq!(sig1, sig2);
    }

    #[test]
    fn signing_key_drops_without_panic() {
        let mut rng = rand_core::OsRng;
        let key = SigningKey::generate(&mut rng);
        let _pub_key = key.verifying_key();
        drop(key);
    }
}
