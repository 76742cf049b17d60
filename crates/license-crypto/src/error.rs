//! Structured errors for every cryptographic primitive this crate exposes.

use license_core::CoreError;
use thiserror::Error;

/// Errors from cryptographic operations.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Signature verification failed.
    #[error("signature verification failed: {0}")]
    VerificationFailed(String),

    /// A signature was not the expected fixed length for its scheme.
    ///
    /// ECDSA-P256 signatures are accepted only at exactly 64 raw bytes
    /// (`r_be(32) || s_be(32)`); ASN.1 DER encodings of the same signature
    /// are a different length and are rejected here, before any
    /// cryptographic verification runs.
    #[error("invalid signature length: expected {expected} bytes, got {actual}")]
    InvalidSignatureLength {
        /// The length this scheme requires.
        expected: usize,
        /// The length actually presented.
        actual: usize,
    },

    /// A public key was malformed or not a valid curve point.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Private or symmetric key material was malformed.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Base64 decoding failed.
    #[error("base64 decode error: {0}")]
    Base64Decode(String),

    /// PKCS#8/PEM encoding or decoding of an ECDSA key failed.
    #[error("key encoding error: {0}")]
    KeyEncoding(String),

    /// AES-256-GCM sealing failed.
    #[error("AEAD seal failed: {0}")]
    SealFailed(String),

    /// AES-256-GCM opening failed (authentication tag mismatch, or the
    /// sealed bytes were too short to contain a nonce).
    #[error("AEAD open failed: {0}")]
    OpenFailed(String),

    /// The master key or a derived key was not exactly the required length.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// The length this operation requires.
        expected: usize,
        /// The length actually presented.
        actual: usize,
    },
}

impl From<CryptoError> for CoreError {
    fn from(err: CryptoError) -> Self {
        CoreError::Crypto(err.to_string())
    }
}
