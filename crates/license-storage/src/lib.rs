//! Persisted entities and repository traits for the license trust plane.
//!
//! This crate defines one `async_trait` repository per logical table
//! (`cml`, `org_keys`, `site_licenses`, `usage_manifests`,
//! `usage_ledger`, `kms_keys`, plus an `organizations` table),
//! and two implementations of each: an in-memory backend
//! ([`memory`], `parking_lot::RwLock`-guarded, used by default and in
//! every unit/property test) and a Postgres backend ([`postgres`],
//! `sqlx` 0.8 runtime queries — no compile-time `query!` macro, so this
//! crate builds without a live database).
//!
//! Business logic (`license-issuer`, `license-validator`, ...) depends
//! only on the trait objects in [`repository`]; which backend is wired
//! up is a `license-api::config`/bootstrap decision.

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod repository;

pub use error::StorageError;
pub use repository::{
    CmlRepository, KeyStoreRepository, OrgKeyRepository, OrganizationRepository,
    SiteLicenseRepository, UsageLedgerRepository, UsageManifestRepository,
};
