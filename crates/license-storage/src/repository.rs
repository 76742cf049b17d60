//! One repository trait per logical table. Every method returns
//! [`StorageError`]; business-logic crates convert that into
//! [`license_core::CoreError`] via `?` at their own boundary.
//!
//! Each trait is implemented twice: [`crate::memory`] (in-process,
//! `parking_lot`-guarded — the default, and what every unit/property
//! test in the workspace runs against) and [`crate::postgres`] (`sqlx`
//! runtime queries against the tables `license-storage/migrations/`
//! creates).

use async_trait::async_trait;
use license_core::{
    CmlId, KeyId, ManifestId, OrgId, OrgKeyId, SiteId, SiteLicenseId, Timestamp, UsageEntryId,
};

use crate::error::StorageError;
use crate::models::{
    Cml, KeyType, KmsKey, OrgKey, Organization, SiteLicense, UsageLedgerEntry, UsageManifest,
};

/// The supplemented `organizations` table: the point of creation for an
/// `org_id` before any CML/OrgKey/SiteLicense references it.
#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    /// Create a new organization row. `Conflict` if `org_id` already exists.
    async fn create(&self, org: Organization) -> Result<Organization, StorageError>;

    /// Look up by `org_id`. `NotFound` on a miss.
    async fn get(&self, org_id: &OrgId) -> Result<Organization, StorageError>;

    /// Whether `org_id` has been created.
    async fn exists(&self, org_id: &OrgId) -> Result<bool, StorageError>;
}

/// The `cml` table — one row per organization (`cml(org_id) unique`).
#[async_trait]
pub trait CmlRepository: Send + Sync {
    /// Persist a newly-uploaded, signature-verified CML. `Conflict` if
    /// the organization already has a CML on file.
    async fn insert(&self, cml: Cml) -> Result<Cml, StorageError>;

    /// Look up the CML for `org_id`. `NotFound` on a miss (never a
    /// synthesized default — see the design note on lazy-default CML).
    async fn get(&self, org_id: &OrgId) -> Result<Cml, StorageError>;

    /// Atomically replace the payload/signature/validity/max_sites of an
    /// existing CML row. `NotFound` if no CML is on file yet.
    async fn replace(&self, cml: Cml) -> Result<Cml, StorageError>;
}

/// The `org_keys` table — unique on `(org_id, key_type)`.
#[async_trait]
pub trait OrgKeyRepository: Send + Sync {
    /// Persist a newly-generated org signing key. `Conflict` on a
    /// duplicate `(org_id, key_type)`.
    async fn insert(&self, key: OrgKey) -> Result<OrgKey, StorageError>;

    /// Look up the signing key for `(org_id, key_type)`. `NotFound` on a miss.
    async fn get(&self, org_id: &OrgId, key_type: KeyType) -> Result<OrgKey, StorageError>;

    /// List every signing key row for an organization (both key types,
    /// if both have been created).
    async fn list_for_org(&self, org_id: &OrgId) -> Result<Vec<OrgKey>, StorageError>;
}

/// The `site_licenses` table, indexed `(org_id, status)`.
#[async_trait]
pub trait SiteLicenseRepository: Send + Sync {
    /// Persist a newly-issued Site License row.
    async fn insert(&self, site: SiteLicense) -> Result<SiteLicense, StorageError>;

    /// Look up by row id.
    async fn get(&self, id: &SiteLicenseId) -> Result<SiteLicense, StorageError>;

    /// Look up by the caller-supplied `(org_id, site_id)` pair.
    async fn get_by_site_id(
        &self,
        org_id: &OrgId,
        site_id: &SiteId,
    ) -> Result<SiteLicense, StorageError>;

    /// Count currently-active Site Licenses for an organization — the
    /// aggregate `SiteIssuer` reads under the per-org mutex to enforce
    /// the max-sites invariant.
    async fn count_active(&self, org_id: &OrgId) -> Result<u32, StorageError>;

    /// List active Site Licenses for an organization — what
    /// `ManifestEmitter` aggregates into a usage manifest.
    async fn list_active(&self, org_id: &OrgId) -> Result<Vec<SiteLicense>, StorageError>;

    /// Paginated listing, optionally filtered by status.
    async fn list(
        &self,
        org_id: &OrgId,
        status: Option<crate::models::SiteStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<SiteLicense>, u64), StorageError>;

    /// Update `last_seen` to the given instant (heartbeat). `NotFound`
    /// if no such row.
    async fn touch_heartbeat(
        &self,
        id: &SiteLicenseId,
        now: Timestamp,
    ) -> Result<SiteLicense, StorageError>;

    /// Flip `status` to `revoked`. Rows are never deleted. `NotFound`
    /// if no such row.
    async fn revoke(&self, id: &SiteLicenseId) -> Result<SiteLicense, StorageError>;

    /// Persist a newly-issued Site License row and append its
    /// `site_issued` [`UsageLedgerEntry`] as a single atomic write: the
    /// Postgres backend wraps both statements in one `sqlx::Transaction`,
    /// the in-memory backend takes both table locks for the duration of
    /// the write. A crash or cancellation between the two writes is not
    /// observable — either both land or neither does.
    async fn insert_with_ledger_entry(
        &self,
        site: SiteLicense,
        entry: UsageLedgerEntry,
    ) -> Result<(SiteLicense, UsageLedgerEntry), StorageError>;

    /// [`Self::touch_heartbeat`] plus a ledger append, atomically.
    async fn touch_heartbeat_with_ledger_entry(
        &self,
        id: &SiteLicenseId,
        now: Timestamp,
        entry: UsageLedgerEntry,
    ) -> Result<(SiteLicense, UsageLedgerEntry), StorageError>;

    /// [`Self::revoke`] plus a ledger append, atomically.
    async fn revoke_with_ledger_entry(
        &self,
        id: &SiteLicenseId,
        entry: UsageLedgerEntry,
    ) -> Result<(SiteLicense, UsageLedgerEntry), StorageError>;
}

/// The `usage_manifests` table.
#[async_trait]
pub trait UsageManifestRepository: Send + Sync {
    /// Persist a freshly-generated, unsent manifest.
    async fn insert(&self, manifest: UsageManifest) -> Result<UsageManifest, StorageError>;

    /// Look up by row id.
    async fn get(&self, id: &ManifestId) -> Result<UsageManifest, StorageError>;

    /// Mark a manifest as sent (`sent_to_root=true`, `sent_at=now`).
    async fn mark_sent(
        &self,
        id: &ManifestId,
        sent_at: Timestamp,
    ) -> Result<UsageManifest, StorageError>;

    /// [`Self::mark_sent`] plus a `manifest_emitted` ledger append,
    /// atomically — see [`SiteLicenseRepository::insert_with_ledger_entry`].
    async fn mark_sent_with_ledger_entry(
        &self,
        id: &ManifestId,
        sent_at: Timestamp,
        entry: UsageLedgerEntry,
    ) -> Result<(UsageManifest, UsageLedgerEntry), StorageError>;
}

/// The `usage_ledger` table — append-only, never mutated after insert.
#[async_trait]
pub trait UsageLedgerRepository: Send + Sync {
    /// Append an entry. Never fails silently — a storage error on
    /// append is always surfaced to the caller.
    async fn append(&self, entry: UsageLedgerEntry) -> Result<UsageLedgerEntry, StorageError>;

    /// Read a page of entries for an organization, strictly ordered by
    /// `created_at` descending, alongside the total row count.
    async fn read(
        &self,
        org_id: &OrgId,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<UsageLedgerEntry>, u64), StorageError>;
}

/// The `kms_keys` table, indexed on `id`.
#[async_trait]
pub trait KeyStoreRepository: Send + Sync {
    /// Persist a newly-registered key. `Conflict` is not expected here
    /// (ids are freshly minted) but the return type stays uniform with
    /// every other repository.
    async fn insert(&self, key: KmsKey) -> Result<KmsKey, StorageError>;

    /// Look up by id. `NotFound` on a miss.
    async fn get(&self, id: &KeyId) -> Result<KmsKey, StorageError>;

    /// List metadata for every key (callers that need "no secret bytes"
    /// project the row down themselves — this trait returns full rows
    /// so both backends stay simple; [`crate::models::KmsKey`] never
    /// holds plaintext to begin with).
    async fn list(&self) -> Result<Vec<KmsKey>, StorageError>;

    /// Optimistic compare-and-swap replace: succeeds only if the stored
    /// row's `version` matches `expected_version`, and always bumps the
    /// version in the replacement. `VersionConflict` on a losing race,
    /// `NotFound` on a miss.
    async fn replace_cas(
        &self,
        key: KmsKey,
        expected_version: u64,
    ) -> Result<KmsKey, StorageError>;
}
