#![deny(missing_docs)]

//! Foundational types shared across the license-issuance and
//! key-management trust plane.
//!
//! This crate has no internal dependencies — only `serde`, `serde_json`,
//! `thiserror`, `chrono`, and `uuid`. Every other crate in the workspace
//! depends on it.
//!
//! - Every identifier is a distinct newtype (see [`identity`]).
//! - [`CanonicalBytes`] is the sole path to the bytes that get signed or
//!   MACed: whoever signs and whoever verifies must derive their bytes
//!   from the same `CanonicalBytes::new`/`from_value` call so the
//!   comparison is meaningful.
//! - [`CoreError`] is the shared error taxonomy; crate-specific errors
//!   convert into it at crate boundaries.

pub mod canonical;
pub mod error;
pub mod identity;
pub mod temporal;

pub use canonical::CanonicalBytes;
pub use error::{CanonicalizationError, CoreError};
pub use identity::{
    CmlId, KeyId, LicenseId, ManifestId, OrgId, OrgKeyId, SiteId, SiteLicenseId, UsageEntryId,
};
pub use temporal::Timestamp;
