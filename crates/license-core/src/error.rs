//! Core error taxonomy.
//!
//! Every fallible operation across the trust plane returns one of these
//! variants. The façade maps each to an HTTP status; nothing here ever
//! carries a secret byte — key material, passwords, and signature
//! preimages beyond what is already public never appear in a `Display`
//! message.

use thiserror::Error;

/// Top-level error type returned by the trust-plane core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Payload parsing or decoding failure.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// A signature did not verify.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// CML <-> Site License linkage is broken.
    #[error("chain mismatch: {0}")]
    ChainMismatch(String),

    /// The entity is temporally invalid with no grace period remaining.
    #[error("expired at {expired_at}")]
    Expired {
        /// The instant the entity expired, formatted RFC-3339.
        expired_at: String,
    },

    /// The entity is past its stated expiry but within the grace window.
    #[error("expired at {expired_at} but within grace period")]
    ExpiredWithGrace {
        /// The instant the entity expired, formatted RFC-3339.
        expired_at: String,
    },

    /// The entity has been revoked.
    #[error("revoked: {0}")]
    Revoked(String),

    /// Entity lookup miss.
    #[error("not found: {0}")]
    NotFound(String),

    /// A missing CML for an organization. Distinct from the generic
    /// `NotFound` so callers cannot confuse "no CML uploaded yet" with
    /// "no such row at all" in a lookup that spans several tables.
    #[error("no CML on file for org {0}")]
    CmlMissing(String),

    /// A uniqueness or optimistic-version conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The CML's `max_sites` capacity has been reached.
    #[error("max sites exceeded: {active}/{max_sites} active for org {org_id}")]
    MaxSitesExceeded {
        /// The organization whose capacity was exceeded.
        org_id: String,
        /// Currently active site count.
        active: u32,
        /// The CML's configured maximum.
        max_sites: u32,
    },

    /// A cryptographic primitive failed (seal, open, derive, verify).
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// A persistence operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Manifest emission exhausted its retry budget.
    #[error("emission failed after retries: {0}")]
    EmissionFailed(String),

    /// Missing or invalid master key, password, or root public key.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Short, stable kind name for structured logging — never includes
    /// the error's interpolated detail.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Malformed(_) => "Malformed",
            CoreError::InvalidSignature(_) => "InvalidSignature",
            CoreError::ChainMismatch(_) => "ChainMismatch",
            CoreError::Expired { .. } => "Expired",
            CoreError::ExpiredWithGrace { .. } => "ExpiredWithGrace",
            CoreError::Revoked(_) => "Revoked",
            CoreError::NotFound(_) => "NotFound",
            CoreError::CmlMissing(_) => "CmlMissing",
            CoreError::Conflict(_) => "Conflict",
            CoreError::MaxSitesExceeded { .. } => "MaxSitesExceeded",
            CoreError::Crypto(_) => "CryptoError",
            CoreError::Storage(_) => "StorageError",
            CoreError::EmissionFailed(_) => "EmissionFailed",
            CoreError::Config(_) => "ConfigError",
        }
    }
}

/// Errors raised while canonicalizing a value prior to digest or
/// signature computation.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// Canonical serialization failed — a non-string map key, an
    /// unrepresentable float (`NaN`/infinite), or an underlying serde error.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
}

impl From<CanonicalizationError> for CoreError {
    fn from(err: CanonicalizationError) -> Self {
        CoreError::Malformed(err.to_string())
    }
}
