//! # ECDSA-P256 Signing and Verification
//!
//! Used for the root authority's and every organization's signing keypair.
//! Signatures are fixed-length raw `r || s` (32 bytes each, big-endian),
//! base64-std encoded on the wire — never ASN.1 DER. A length that is not
//! exactly 64 bytes is rejected before the verification step runs, so a
//! validly-encoded DER signature over the same `(r, s)` pair does not
//! verify under this API.
//!
//! Private keys are PKCS#8 DER, usually wrapped in a PEM block for storage
//! (see [`OrgSigningKey::to_pkcs8_pem`]/[`OrgSigningKey::from_pkcs8_pem`]).
//! Public keys are SPKI PEM.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use license_core::CanonicalBytes;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use zeroize::Zeroize;

use crate::error::CryptoError;

const SIG_LEN: usize = 64;

/// An ECDSA-P256 signature, fixed at 64 raw bytes (`r_be(32) || s_be(32)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdsaSignature([u8; SIG_LEN]);

impl EcdsaSignature {
    /// Validate length and wrap raw `r || s` bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; SIG_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignatureLength {
                expected: SIG_LEN,
                actual: bytes.len(),
            }
        })?;
        Ok(Self(arr))
    }

    /// Access the raw 64-byte `r || s` encoding.
    pub fn as_bytes(&self) -> &[u8; SIG_LEN] {
        &self.0
    }

    /// Encode as base64-std for the wire.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Decode from base64-std, rejecting anything that does not decode to
    /// exactly 64 bytes (this is where a DER-encoded signature is rejected,
    /// since its length never matches 64 after base64 decoding).
    pub fn from_base64(s: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(s.trim())
            .map_err(|e| CryptoError::Base64Decode(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

/// An ECDSA-P256 signing (private) key.
pub struct OrgSigningKey {
    inner: SigningKey,
}

impl OrgSigningKey {
    /// Generate a fresh P-256 keypair.
    pub fn generate<R: rand_core::CryptoRngCore>(csprng: &mut R) -> Self {
        Self {
            inner: SigningKey::random(csprng),
        }
    }

    /// Decode from a PKCS#8 PEM block (as produced by [`Self::to_pkcs8_pem`]).
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, CryptoError> {
        let inner =
            SigningKey::from_pkcs8_pem(pem).map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Encode as a PKCS#8 PEM block — the plaintext form that
    /// `OrgKeyVault` seals with PBKDF2 + AES-256-GCM before it ever
    /// touches storage.
    pub fn to_pkcs8_pem(&self) -> Result<String, CryptoError> {
        use p256::pkcs8::LineEnding;
        self.inner
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))
    }

    /// Derive the corresponding public key.
    pub fn verifying_key(&self) -> OrgVerifyingKey {
        OrgVerifyingKey {
            inner: *self.inner.verifying_key(),
        }
    }

    /// Sign canonicalized data. The signature is ECDSA over SHA-256 of the
    /// payload, encoded as fixed 64-byte raw `r || s`.
    pub fn sign(&self, data: &CanonicalBytes) -> EcdsaSignature {
        let sig: Signature = self.inner.sign(data.as_bytes());
        let bytes = sig.to_bytes();
        let mut out = [0u8; SIG_LEN];
        out.copy_from_slice(&bytes);
        EcdsaSignature(out)
    }
}

impl std::fmt::Debug for OrgSigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrgSigningKey").finish_non_exhaustive()
    }
}

impl Drop for OrgSigningKey {
    fn drop(&mut self) {
        let mut scalar_bytes = self.inner.to_bytes();
        scalar_bytes.zeroize();
    }
}

/// An ECDSA-P256 verifying (public) key.
#[derive(Debug, Clone)]
pub struct OrgVerifyingKey {
    inner: VerifyingKey,
}

impl OrgVerifyingKey {
    /// Decode from an SPKI PEM block.
    pub fn from_spki_pem(pem: &str) -> Result<Self, CryptoError> {
        let inner = VerifyingKey::from_public_key_pem(pem)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Encode as an SPKI PEM block.
    pub fn to_spki_pem(&self) -> Result<String, CryptoError> {
        use p256::pkcs8::LineEnding;
        self.inner
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))
    }

    /// Verify a signature over canonicalized data. Rejects any signature
    /// that is not exactly 64 raw bytes before attempting verification.
    pub fn verify(
        &self,
        data: &CanonicalBytes,
        signature: &EcdsaSignature,
    ) -> Result<(), CryptoError> {
        let sig = Signature::from_slice(signature.as_bytes())
            .map_err(|e| CryptoError::VerificationFailed(e.to_string()))?;
        self.inner
            .verify(data.as_bytes(), &sig)
            .map_err(|e| CryptoError::VerificationFailed(e.to_string()))
    }
}

impl PartialEq for OrgVerifyingKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for OrgVerifyingKey {}

/// Generate a fresh P-256 keypair from the OS random source.
pub fn generate_signing_keypair() -> (OrgSigningKey, OrgVerifyingKey) {
    let mut rng = rand_core::OsRng;
    let sk = OrgSigningKey::generate(&mut rng);
    let vk = sk.verifying_key();
    (sk, vk)
}

/// Verify raw signature bytes (already decoded from base64) against a
/// payload and public key, rejecting any length other than 64 bytes
/// before verification — the signature-encoding-ambiguity guard spec
/// calls for explicitly.
pub fn verify_raw(
    payload: &CanonicalBytes,
    sig_bytes: &[u8],
    public: &OrgVerifyingKey,
) -> Result<(), CryptoError> {
    let sig = EcdsaSignature::from_slice(sig_bytes)?;
    public.verify(payload, &sig)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keypair_generation_and_roundtrip_sign_verify() {
        let (sk, vk) = generate_signing_keypair();
        let data = CanonicalBytes::new(&json!({"org_id": "acme", "max_sites": 2})).unwrap();
        let sig = sk.sign(&data);
        assert!(vk.verify(&data, &sig).is_ok());
    }

    #[test]
    fn verification_fails_with_wrong_key() {
        let (sk, _) = generate_signing_keypair();
        let (_, vk2) = generate_signing_keypair();
        let data = CanonicalBytes::new(&json!({"x": 1})).unwrap();
        let sig = sk.sign(&data);
        assert!(vk2.verify(&data, &sig).is_err());
    }

    #[test]
    fn verification_fails_with_tampered_data() {
        let (sk, vk) = generate_signing_keypair();
        let original = CanonicalBytes::new(&json!({"val": 42})).unwrap();
        let tampered = CanonicalBytes::new(&json!({"val": 43})).unwrap();
        let sig = sk.sign(&original);
        assert!(vk.verify(&tampered, &sig).is_err());
    }

    #[test]
    fn signature_is_fixed_64_bytes() {
        let (sk, _) = generate_signing_keypair();
        let data = CanonicalBytes::new(&json!({"a": "b"})).unwrap();
        let sig = sk.sign(&data);
        assert_eq!(sig.as_bytes().len(), 64);
    }

    #[test]
    fn non_64_byte_signature_rejected_before_verify() {
        let result = EcdsaSignature::from_slice(&[0u8; 70]);
        assert!(result.is_err());
        match result.unwrap_err() {
            CryptoError::InvalidSignatureLength { expected, actual } => {
                assert_eq!(expected, 64);
                assert_eq!(actual, 70);
            }
            other => panic!("expected InvalidSignatureLength, got: {other}"),
        }
    }

    #[test]
    fn pkcs8_pem_roundtrip() {
        let (sk, vk) = generate_signing_keypair();
        let pem = sk.to_pkcs8_pem().unwrap();
        let sk2 = OrgSigningKey::from_pkcs8_pem(&pem).unwrap();
        assert_eq!(sk2.verifying_key(), vk);
    }

    #[test]
    fn spki_pem_roundtrip() {
        let (_, vk) = generate_signing_keypair();
        let pem = vk.to_spki_pem().unwrap();
        let vk2 = OrgVerifyingKey::from_spki_pem(&pem).unwrap();
        assert_eq!(vk, vk2);
    }

    #[test]
    fn base64_signature_roundtrip() {
        let (sk, _) = generate_signing_keypair();
        let data = CanonicalBytes::new(&json!({"c": 3})).unwrap();
        let sig = sk.sign(&data);
        let encoded = sig.to_base64();
        let recovered = EcdsaSignature::from_base64(&encoded).unwrap();
        assert_eq!(sig, recovered);
    }

    #[test]
    fn signing_key_debug_does_not_leak_private_key() {
        let (sk, _) = generate_signing_keypair();
        let debug_str = format!("{sk:?}");
        assert!(!debug_str.to_lowercase().contains("scalar"));
    }
}
