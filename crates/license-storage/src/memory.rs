//! In-memory backend: one `parking_lot::RwLock<HashMap<...>>` per table.
//!
//! This is the default backend (selected by `license-api::config` when
//! `DB_PATH` does not point at a Postgres DSN) and the backend every
//! unit/property/scenario test in the workspace runs against.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use license_core::{CmlId, KeyId, ManifestId, OrgId, OrgKeyId, SiteId, SiteLicenseId, Timestamp, UsageEntryId};
use parking_lot::RwLock;

use crate::error::StorageError;
use crate::models::{
    Cml, KeyType, KmsKey, OrgKey, Organization, SiteLicense, SiteStatus, UsageLedgerEntry,
    UsageManifest,
};
use crate::repository::{
    CmlRepository, KeyStoreRepository, OrgKeyRepository, OrganizationRepository,
    SiteLicenseRepository, UsageLedgerRepository, UsageManifestRepository,
};

/// The `usage_ledger` table's backing map, shared (via `Arc`) between
/// [`MemoryUsageLedgerRepository`] and every repository whose
/// `*_with_ledger_entry` methods need to append to it under the same
/// critical section as their own table write.
pub type LedgerRows = RwLock<HashMap<OrgId, Vec<UsageLedgerEntry>>>;

/// In-memory `organizations` table.
#[derive(Default)]
pub struct MemoryOrganizationRepository {
    rows: RwLock<HashMap<OrgId, Organization>>,
}

impl MemoryOrganizationRepository {
    /// Construct an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrganizationRepository for MemoryOrganizationRepository {
    async fn create(&self, org: Organization) -> Result<Organization, StorageError> {
        let mut rows = self.rows.write();
        if rows.contains_key(&org.org_id) {
            return Err(StorageError::Conflict(format!(
                "organization {} already exists",
                org.org_id
            )));
        }
        rows.insert(org.org_id.clone(), org.clone());
        Ok(org)
    }

    async fn get(&self, org_id: &OrgId) -> Result<Organization, StorageError> {
        self.rows
            .read()
            .get(org_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("organization {org_id}")))
    }

    async fn exists(&self, org_id: &OrgId) -> Result<bool, StorageError> {
        Ok(self.rows.read().contains_key(org_id))
    }
}

/// In-memory `cml` table, unique on `org_id`.
#[derive(Default)]
pub struct MemoryCmlRepository {
    by_org: RwLock<HashMap<OrgId, Cml>>,
}

impl MemoryCmlRepository {
    /// Construct an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CmlRepository for MemoryCmlRepository {
    async fn insert(&self, cml: Cml) -> Result<Cml, StorageError> {
        let mut rows = self.by_org.write();
        if rows.contains_key(&cml.org_id) {
            return Err(StorageError::Conflict(format!(
                "CML already on file for org {}",
                cml.org_id
            )));
        }
        rows.insert(cml.org_id.clone(), cml.clone());
        Ok(cml)
    }

    async fn get(&self, org_id: &OrgId) -> Result<Cml, StorageError> {
        self.by_org
            .read()
            .get(org_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("CML for org {org_id}")))
    }

    async fn replace(&self, cml: Cml) -> Result<Cml, StorageError> {
        let mut rows = self.by_org.write();
        if !rows.contains_key(&cml.org_id) {
            return Err(StorageError::NotFound(format!(
                "CML for org {} (refresh requires an existing row)",
                cml.org_id
            )));
        }
        rows.insert(cml.org_id.clone(), cml.clone());
        Ok(cml)
    }
}

/// In-memory `org_keys` table, unique on `(org_id, key_type)`.
#[derive(Default)]
pub struct MemoryOrgKeyRepository {
    rows: RwLock<HashMap<(OrgId, KeyType), OrgKey>>,
}

impl MemoryOrgKeyRepository {
    /// Construct an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrgKeyRepository for MemoryOrgKeyRepository {
    async fn insert(&self, key: OrgKey) -> Result<OrgKey, StorageError> {
        let mut rows = self.rows.write();
        let composite = (key.org_id.clone(), key.key_type);
        if rows.contains_key(&composite) {
            return Err(StorageError::Conflict(format!(
                "org key already exists for ({}, {:?})",
                key.org_id, key.key_type
            )));
        }
        rows.insert(composite, key.clone());
        Ok(key)
    }

    async fn get(&self, org_id: &OrgId, key_type: KeyType) -> Result<OrgKey, StorageError> {
        self.rows
            .read()
            .get(&(org_id.clone(), key_type))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("org key ({org_id}, {key_type:?})")))
    }

    async fn list_for_org(&self, org_id: &OrgId) -> Result<Vec<OrgKey>, StorageError> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|k| &k.org_id == org_id)
            .cloned()
            .collect())
    }
}

/// In-memory `site_licenses` table.
pub struct MemorySiteLicenseRepository {
    rows: RwLock<HashMap<SiteLicenseId, SiteLicense>>,
    ledger: Arc<LedgerRows>,
}

impl MemorySiteLicenseRepository {
    /// Construct an empty repository over the given `usage_ledger`
    /// backing map — shared with a [`MemoryUsageLedgerRepository`] built
    /// from [`MemoryUsageLedgerRepository::shared_rows`] so both tables
    /// can be written under one lock acquisition.
    pub fn new(ledger: Arc<LedgerRows>) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            ledger,
        }
    }
}

#[async_trait]
impl SiteLicenseRepository for MemorySiteLicenseRepository {
    async fn insert(&self, site: SiteLicense) -> Result<SiteLicense, StorageError> {
        let mut rows = self.rows.write();
        if rows.values().any(|s| s.org_id == site.org_id && s.site_id == site.site_id) {
            return Err(StorageError::Conflict(format!(
                "site {} already exists for org {}",
                site.site_id, site.org_id
            )));
        }
        rows.insert(site.id, site.clone());
        Ok(site)
    }

    async fn get(&self, id: &SiteLicenseId) -> Result<SiteLicense, StorageError> {
        self.rows
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("site license {id}")))
    }

    async fn get_by_site_id(
        &self,
        org_id: &OrgId,
        site_id: &SiteId,
    ) -> Result<SiteLicense, StorageError> {
        self.rows
            .read()
            .values()
            .find(|s| &s.org_id == org_id && &s.site_id == site_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("site {site_id} for org {org_id}")))
    }

    async fn count_active(&self, org_id: &OrgId) -> Result<u32, StorageError> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|s| &s.org_id == org_id && s.status == SiteStatus::Active)
            .count() as u32)
    }

    async fn list_active(&self, org_id: &OrgId) -> Result<Vec<SiteLicense>, StorageError> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|s| &s.org_id == org_id && s.status == SiteStatus::Active)
            .cloned()
            .collect())
    }

    async fn list(
        &self,
        org_id: &OrgId,
        status: Option<SiteStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<SiteLicense>, u64), StorageError> {
        let rows = self.rows.read();
        let mut matching: Vec<SiteLicense> = rows
            .values()
            .filter(|s| &s.org_id == org_id && status.map(|st| st == s.status).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn touch_heartbeat(
        &self,
        id: &SiteLicenseId,
        now: Timestamp,
    ) -> Result<SiteLicense, StorageError> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("site license {id}")))?;
        row.last_seen = now;
        Ok(row.clone())
    }

    async fn revoke(&self, id: &SiteLicenseId) -> Result<SiteLicense, StorageError> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("site license {id}")))?;
        row.status = SiteStatus::Revoked;
        Ok(row.clone())
    }

    async fn insert_with_ledger_entry(
        &self,
        site: SiteLicense,
        entry: UsageLedgerEntry,
    ) -> Result<(SiteLicense, UsageLedgerEntry), StorageError> {
        let mut rows = self.rows.write();
        let mut ledger = self.ledger.write();
        if rows.values().any(|s| s.org_id == site.org_id && s.site_id == site.site_id) {
            return Err(StorageError::Conflict(format!(
                "site {} already exists for org {}",
                site.site_id, site.org_id
            )));
        }
        rows.insert(site.id, site.clone());
        ledger.entry(entry.org_id.clone()).or_default().push(entry.clone());
        Ok((site, entry))
    }

    async fn touch_heartbeat_with_ledger_entry(
        &self,
        id: &SiteLicenseId,
        now: Timestamp,
        entry: UsageLedgerEntry,
    ) -> Result<(SiteLicense, UsageLedgerEntry), StorageError> {
        let mut rows = self.rows.write();
        let mut ledger = self.ledger.write();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("site license {id}")))?;
        row.last_seen = now;
        let updated = row.clone();
        ledger.entry(entry.org_id.clone()).or_default().push(entry.clone());
        Ok((updated, entry))
    }

    async fn revoke_with_ledger_entry(
        &self,
        id: &SiteLicenseId,
        entry: UsageLedgerEntry,
    ) -> Result<(SiteLicense, UsageLedgerEntry), StorageError> {
        let mut rows = self.rows.write();
        let mut ledger = self.ledger.write();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("site license {id}")))?;
        row.status = SiteStatus::Revoked;
        let updated = row.clone();
        ledger.entry(entry.org_id.clone()).or_default().push(entry.clone());
        Ok((updated, entry))
    }
}

/// In-memory `usage_manifests` table.
pub struct MemoryUsageManifestRepository {
    rows: RwLock<HashMap<ManifestId, UsageManifest>>,
    ledger: Arc<LedgerRows>,
}

impl MemoryUsageManifestRepository {
    /// Construct an empty repository over the given shared `usage_ledger`
    /// backing map (see [`MemorySiteLicenseRepository::new`]).
    pub fn new(ledger: Arc<LedgerRows>) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            ledger,
        }
    }
}

#[async_trait]
impl UsageManifestRepository for MemoryUsageManifestRepository {
    async fn insert(&self, manifest: UsageManifest) -> Result<UsageManifest, StorageError> {
        let mut rows = self.rows.write();
        rows.insert(manifest.id, manifest.clone());
        Ok(manifest)
    }

    async fn get(&self, id: &ManifestId) -> Result<UsageManifest, StorageError> {
        self.rows
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("usage manifest {id}")))
    }

    async fn mark_sent(
        &self,
        id: &ManifestId,
        sent_at: Timestamp,
    ) -> Result<UsageManifest, StorageError> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("usage manifest {id}")))?;
        row.sent_to_root = true;
        row.sent_at = Some(sent_at);
        Ok(row.clone())
    }

    async fn mark_sent_with_ledger_entry(
        &self,
        id: &ManifestId,
        sent_at: Timestamp,
        entry: UsageLedgerEntry,
    ) -> Result<(UsageManifest, UsageLedgerEntry), StorageError> {
        let mut rows = self.rows.write();
        let mut ledger = self.ledger.write();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("usage manifest {id}")))?;
        row.sent_to_root = true;
        row.sent_at = Some(sent_at);
        let updated = row.clone();
        ledger.entry(entry.org_id.clone()).or_default().push(entry.clone());
        Ok((updated, entry))
    }
}

/// In-memory `usage_ledger` table — append-only.
pub struct MemoryUsageLedgerRepository {
    rows: Arc<LedgerRows>,
}

impl Default for MemoryUsageLedgerRepository {
    fn default() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl MemoryUsageLedgerRepository {
    /// Construct an empty repository with its own backing map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the `Arc` to this repository's backing map, so a
    /// [`MemorySiteLicenseRepository`] or [`MemoryUsageManifestRepository`]
    /// constructed over the same handle can append to it under the same
    /// lock acquisition as its own table write.
    pub fn shared_rows(&self) -> Arc<LedgerRows> {
        self.rows.clone()
    }
}

#[async_trait]
impl UsageLedgerRepository for MemoryUsageLedgerRepository {
    async fn append(&self, entry: UsageLedgerEntry) -> Result<UsageLedgerEntry, StorageError> {
        let mut rows = self.rows.write();
        rows.entry(entry.org_id.clone()).or_default().push(entry.clone());
        Ok(entry)
    }

    async fn read(
        &self,
        org_id: &OrgId,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<UsageLedgerEntry>, u64), StorageError> {
        let rows = self.rows.read();
        let all = rows.get(org_id).cloned().unwrap_or_default();
        let mut sorted = all;
        sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = sorted.len() as u64;
        let page = sorted
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }
}

/// In-memory `kms_keys` table.
#[derive(Default)]
pub struct MemoryKeyStoreRepository {
    rows: RwLock<HashMap<KeyId, KmsKey>>,
}

impl MemoryKeyStoreRepository {
    /// Construct an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStoreRepository for MemoryKeyStoreRepository {
    async fn insert(&self, key: KmsKey) -> Result<KmsKey, StorageError> {
        let mut rows = self.rows.write();
        rows.insert(key.id, key.clone());
        Ok(key)
    }

    async fn get(&self, id: &KeyId) -> Result<KmsKey, StorageError> {
        self.rows
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("KMS key {id}")))
    }

    async fn list(&self) -> Result<Vec<KmsKey>, StorageError> {
        Ok(self.rows.read().values().cloned().collect())
    }

    async fn replace_cas(
        &self,
        key: KmsKey,
        expected_version: u64,
    ) -> Result<KmsKey, StorageError> {
        let mut rows = self.rows.write();
        let current = rows
            .get(&key.id)
            .ok_or_else(|| StorageError::NotFound(format!("KMS key {}", key.id)))?;
        if current.version != expected_version {
            return Err(StorageError::VersionConflict {
                id: key.id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }
        rows.insert(key.id, key.clone());
        Ok(key)
    }
}
