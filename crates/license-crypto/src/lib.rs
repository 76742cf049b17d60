//! Cryptographic primitives for the license trust plane: ECDSA-P256 and
//! Ed25519 signing, AES-256-GCM envelope sealing, PBKDF2-HMAC-SHA256
//! derivation, HMAC-SHA256 tagging, and constant-time comparison.
//!
//! Every signing/verification function takes a [`license_core::CanonicalBytes`]
//! rather than a raw slice, so the canonicalization discipline that makes
//! signatures reproducible is enforced by the type system, not convention.

pub mod aead;
pub mod ecdsa;
pub mod ed25519;
pub mod error;
pub mod hmac;
pub mod kdf;

pub use ecdsa::{EcdsaSignature, OrgSigningKey, OrgVerifyingKey};
pub use ed25519::{Ed25519Signature, SigningKey, VerifyingKey};
pub use error::CryptoError;
pub use hmac::{constant_time_eq, hmac_sha256};
pub use kdf::{pbkdf2, validate_password, DerivedKey};
