//! Site License issuance, heartbeat, and revocation.
//!
//! Issuance runs under a per-organization lock: a map from `org_id` to a
//! lazily-created `tokio::sync::Mutex`, itself guarded by a
//! `parking_lot::Mutex` while the map is read or grown. Holding the
//! per-org lock across the storage calls inside [`SiteIssuer::issue`] is
//! what makes the max-sites check and the row insert atomic with respect
//! to a second concurrent issuance for the same org — cross-organization
//! issuance is unaffected, since each org gets its own lock.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use license_core::{CanonicalBytes, CoreError, OrgId, SiteId, SiteLicenseId, Timestamp, UsageEntryId};
use license_registry::CmlRegistry;
use license_storage::models::{KeyType, LedgerEntryType, SiteLicense, SiteStatus, UsageLedgerEntry};
use license_storage::{SiteLicenseRepository, UsageLedgerRepository};
use license_vault::OrgKeyVault;
use parking_lot::Mutex as SyncMutex;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;

/// Issues, heartbeats, and revokes Site Licenses.
pub struct SiteIssuer {
    cmls: Arc<CmlRegistry>,
    vault: Arc<OrgKeyVault>,
    sites: Arc<dyn SiteLicenseRepository>,
    ledger: Arc<dyn UsageLedgerRepository>,
    org_locks: SyncMutex<HashMap<OrgId, Arc<AsyncMutex<()>>>>,
}

impl SiteIssuer {
    /// Wrap the collaborators an issuance needs.
    pub fn new(
        cmls: Arc<CmlRegistry>,
        vault: Arc<OrgKeyVault>,
        sites: Arc<dyn SiteLicenseRepository>,
        ledger: Arc<dyn UsageLedgerRepository>,
    ) -> Self {
        Self {
            cmls,
            vault,
            sites,
            ledger,
            org_locks: SyncMutex::new(HashMap::new()),
        }
    }

    fn org_lock(&self, org_id: &OrgId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.org_locks.lock();
        locks
            .entry(org_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Issue a Site License for `site_id` under the org's per-org lock.
    /// Fails `CmlMissing` if the org has no CML on file, `MaxSitesExceeded`
    /// if `active_site_count >= cml.max_sites`.
    pub async fn issue(
        &self,
        org_id: &OrgId,
        site_id: SiteId,
        fingerprint: BTreeMap<String, String>,
        key_type: KeyType,
    ) -> Result<SiteLicense, CoreError> {
        let lock = self.org_lock(org_id);
        let _guard = lock.lock().await;

        let cml = self.cmls.get(org_id).await?;
        let active = self.sites.count_active(org_id).await.map_err(CoreError::from)?;
        if active >= cml.max_sites {
            return Err(CoreError::MaxSitesExceeded {
                org_id: org_id.to_string(),
                active,
                max_sites: cml.max_sites,
            });
        }

        let issued_at = Timestamp::now();
        let payload = json!({
            "type": "site_license",
            "site_id": site_id.as_str(),
            "parent_cml": org_id.as_str(),
            "parent_cml_sig": cml.signature,
            "fingerprint": fingerprint,
            "issued_at": issued_at.to_canonical_string(),
            "expires_at": cml.validity.to_canonical_string(),
            "features": cml.feature_packs,
        });
        let canonical = CanonicalBytes::new(&payload).map_err(CoreError::from)?;
        let signature = self.vault.sign(org_id, key_type, &canonical).await?;

        let row = SiteLicense {
            id: SiteLicenseId::new(),
            site_id,
            org_id: org_id.clone(),
            fingerprint,
            license_payload: canonical.as_bytes().to_vec(),
            signature: signature.to_base64(),
            issued_at,
            expires_at: cml.validity,
            last_seen: issued_at,
            status: SiteStatus::Active,
            key_type,
        };
        let entry = UsageLedgerEntry {
            id: UsageEntryId::new(),
            org_id: org_id.clone(),
            entry_type: LedgerEntryType::SiteIssued,
            site_id: Some(row.site_id.clone()),
            data: json!({"site_license_id": row.id.to_string()}),
            signature: None,
            created_at: Timestamp::now(),
        };
        let (inserted, _entry) = self
            .sites
            .insert_with_ledger_entry(row, entry)
            .await
            .map_err(CoreError::from)?;

        Ok(inserted)
    }

    /// Record a heartbeat from an already-issued site.
    pub async fn heartbeat(&self, id: &SiteLicenseId) -> Result<SiteLicense, CoreError> {
        let now = Timestamp::now();
        let current = self.sites.get(id).await.map_err(CoreError::from)?;
        let entry = UsageLedgerEntry {
            id: UsageEntryId::new(),
            org_id: current.org_id.clone(),
            entry_type: LedgerEntryType::Heartbeat,
            site_id: Some(current.site_id.clone()),
            data: json!({"last_seen": now.to_canonical_string()}),
            signature: None,
            created_at: now,
        };
        let (updated, _entry) = self
            .sites
            .touch_heartbeat_with_ledger_entry(id, now, entry)
            .await
            .map_err(CoreError::from)?;

        Ok(updated)
    }

    /// Revoke a Site License. Rows are never deleted; `status` flips to
    /// `revoked`, freeing capacity for future issuance against the org's
    /// `max_sites` limit.
    pub async fn revoke(&self, id: &SiteLicenseId) -> Result<SiteLicense, CoreError> {
        let current = self.sites.get(id).await.map_err(CoreError::from)?;
        let entry = UsageLedgerEntry {
            id: UsageEntryId::new(),
            org_id: current.org_id.clone(),
            entry_type: LedgerEntryType::Revoked,
            site_id: Some(current.site_id.clone()),
            data: json!({"site_license_id": current.id.to_string()}),
            signature: None,
            created_at: Timestamp::now(),
        };
        let (updated, _entry) = self
            .sites
            .revoke_with_ledger_entry(id, entry)
            .await
            .map_err(CoreError::from)?;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use license_crypto::ecdsa::generate_signing_keypair;
    use license_storage::memory::{
        MemoryCmlRepository, MemoryOrgKeyRepository, MemoryOrganizationRepository,
        MemorySiteLicenseRepository, MemoryUsageLedgerRepository,
    };
    use license_storage::models::Organization;
    use license_storage::{CmlRepository, OrganizationRepository};

    async fn issuer_with_cml(org_id: &OrgId, max_sites: u32) -> SiteIssuer {
        let orgs_repo = Arc::new(MemoryOrganizationRepository::new());
        orgs_repo
            .create(Organization {
                org_id: org_id.clone(),
                display_name: "Acme".to_string(),
                created_at: Timestamp::now(),
            })
            .await
            .unwrap();

        let cml_repo: Arc<dyn CmlRepository> = Arc::new(MemoryCmlRepository::new());
        let (root_signing, root_verifying) = generate_signing_keypair();
        let root_pem = root_verifying.to_spki_pem().unwrap();
        let cml_payload = serde_json::to_vec(&json!({
            "org_id": org_id.as_str(),
            "max_sites": max_sites,
            "validity": "2030-01-01T00:00:00Z",
            "feature_packs": ["core"],
        }))
        .unwrap();
        let sig = root_signing.sign(&CanonicalBytes::from_raw_trusted(cml_payload.clone()));
        let cmls = CmlRegistry::new(orgs_repo, cml_repo);
        cmls.upload(org_id, cml_payload, &sig.to_base64(), &root_pem)
            .await
            .unwrap();

        let vault_repo = Arc::new(MemoryOrgKeyRepository::new());
        let vault = OrgKeyVault::new(vault_repo, "a sufficiently long password").unwrap();
        vault.create(org_id, KeyType::Prod).await.unwrap();

        let ledger = MemoryUsageLedgerRepository::new();
        let sites = Arc::new(MemorySiteLicenseRepository::new(ledger.shared_rows()));

        SiteIssuer::new(Arc::new(cmls), Arc::new(vault), sites, Arc::new(ledger))
    }

    #[tokio::test]
    async fn issuance_fails_cml_missing_without_upload() {
        let orgs_repo = Arc::new(MemoryOrganizationRepository::new());
        let org_id = OrgId::new("no-cml");
        orgs_repo
            .create(Organization {
                org_id: org_id.clone(),
                display_name: "x".to_string(),
                created_at: Timestamp::now(),
            })
            .await
            .unwrap();
        let cmls = Arc::new(CmlRegistry::new(orgs_repo, Arc::new(MemoryCmlRepository::new())));
        let vault = Arc::new(
            OrgKeyVault::new(Arc::new(MemoryOrgKeyRepository::new()), "a sufficiently long password")
                .unwrap(),
        );
        let ledger = MemoryUsageLedgerRepository::new();
        let sites = Arc::new(MemorySiteLicenseRepository::new(ledger.shared_rows()));
        let issuer = SiteIssuer::new(cmls, vault, sites, Arc::new(ledger));
        let result = issuer
            .issue(&org_id, SiteId::new("s1"), BTreeMap::new(), KeyType::Prod)
            .await;
        assert!(matches!(result, Err(CoreError::CmlMissing(_))));
    }

    #[tokio::test]
    async fn max_sites_boundary_nth_succeeds_n_plus_one_fails() {
        let org_id = OrgId::new("acme");
        let issuer = issuer_with_cml(&org_id, 2).await;

        let mut fp1 = BTreeMap::new();
        fp1.insert("addr".to_string(), "10.0.0.1".to_string());
        issuer
            .issue(&org_id, SiteId::new("s1"), fp1, KeyType::Prod)
            .await
            .unwrap();

        let mut fp2 = BTreeMap::new();
        fp2.insert("addr".to_string(), "10.0.0.2".to_string());
        let s2 = issuer
            .issue(&org_id, SiteId::new("s2"), fp2, KeyType::Prod)
            .await
            .unwrap();

        let mut fp3 = BTreeMap::new();
        fp3.insert("addr".to_string(), "10.0.0.3".to_string());
        let result = issuer
            .issue(&org_id, SiteId::new("s3"), fp3.clone(), KeyType::Prod)
            .await;
        assert!(matches!(result, Err(CoreError::MaxSitesExceeded { .. })));

        issuer.revoke(&s2.id).await.unwrap();
        let reissued = issuer
            .issue(&org_id, SiteId::new("s3"), fp3, KeyType::Prod)
            .await
            .unwrap();
        assert_eq!(reissued.status, SiteStatus::Active);
    }

    #[tokio::test]
    async fn heartbeat_updates_last_seen() {
        let org_id = OrgId::new("acme");
        let issuer = issuer_with_cml(&org_id, 1).await;
        let issued = issuer
            .issue(&org_id, SiteId::new("s1"), BTreeMap::new(), KeyType::Prod)
            .await
            .unwrap();
        let touched = issuer.heartbeat(&issued.id).await.unwrap();
        assert!(!touched.last_seen.is_before(&issued.last_seen));
    }

    #[tokio::test]
    async fn site_license_signature_verifies_under_org_public_key() {
        let org_id = OrgId::new("acme");
        let issuer = issuer_with_cml(&org_id, 1).await;
        let issued = issuer
            .issue(&org_id, SiteId::new("s1"), BTreeMap::new(), KeyType::Prod)
            .await
            .unwrap();
        let public = issuer.vault.public_key(&org_id, KeyType::Prod).await.unwrap();
        let wrapped = CanonicalBytes::from_raw_trusted(issued.license_payload.clone());
        let sig = license_crypto::ecdsa::EcdsaSignature::from_base64(&issued.signature).unwrap();
        assert!(public.verify(&wrapped, &sig).is_ok());
    }
}
