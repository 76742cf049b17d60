//! Organization and Customer Master License registries.
//!
//! [`OrganizationRegistry`] is the point of creation for an `org_id`:
//! nothing else in the trust plane will accept an `org_id` that hasn't
//! been created here first. [`CmlRegistry`] holds the signed capacity
//! grant for an organization — one row per org, uploaded once and
//! refreshed in place, never synthesized on a lookup miss.
//!
//! A CML's signature is verified against whatever `issuer_public_pem`
//! the caller presents at upload time (the root authority's key in
//! production, any keypair in a test). `refresh` must present a
//! signature that verifies under that same stored key — there is no
//! path to silently re-key a CML.

use std::sync::Arc;

use license_core::{CanonicalBytes, CmlId, CoreError, OrgId, Timestamp};
use license_crypto::ecdsa::{verify_raw, OrgVerifyingKey};
use license_storage::models::{Cml, Organization};
use license_storage::{CmlRepository, OrganizationRepository};
use serde::Deserialize;

/// Fields an issuer-authored CML document carries, parsed out of the
/// opaque `cml_payload` bytes for storage-side invariants (`max_sites`,
/// capacity checks) without ever re-serializing the payload itself.
#[derive(Debug, Deserialize)]
struct CmlDocument {
    org_id: String,
    max_sites: u32,
    validity: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    feature_packs: Vec<String>,
}

/// Registry of known organizations — the point of creation for `org_id`.
pub struct OrganizationRegistry {
    repo: Arc<dyn OrganizationRepository>,
}

impl OrganizationRegistry {
    /// Wrap a repository.
    pub fn new(repo: Arc<dyn OrganizationRepository>) -> Self {
        Self { repo }
    }

    /// Mint a new organization. `Conflict` if `org_id` is already taken.
    pub async fn create(&self, org_id: OrgId, display_name: impl Into<String>) -> Result<Organization, CoreError> {
        let org = Organization {
            org_id,
            display_name: display_name.into(),
            created_at: Timestamp::now(),
        };
        self.repo.create(org).await.map_err(CoreError::from)
    }

    /// Look up an organization. `NotFound` on a miss.
    pub async fn get(&self, org_id: &OrgId) -> Result<Organization, CoreError> {
        self.repo.get(org_id).await.map_err(CoreError::from)
    }

    /// Whether `org_id` has been created.
    pub async fn exists(&self, org_id: &OrgId) -> Result<bool, CoreError> {
        self.repo.exists(org_id).await.map_err(CoreError::from)
    }
}

/// Registry of Customer Master Licenses — one per organization.
pub struct CmlRegistry {
    orgs: Arc<dyn OrganizationRepository>,
    repo: Arc<dyn CmlRepository>,
}

impl CmlRegistry {
    /// Wrap the organization and CML repositories.
    pub fn new(orgs: Arc<dyn OrganizationRepository>, repo: Arc<dyn CmlRepository>) -> Self {
        Self { orgs, repo }
    }

    /// Verify `signature_b64` over `cml_payload` under `issuer_public_pem`
    /// and persist it as the organization's CML. The target `org_id` must
    /// already exist (`NotFound` otherwise); a second upload for the same
    /// org is a `Conflict` — use [`Self::refresh`] instead.
    pub async fn upload(
        &self,
        org_id: &OrgId,
        cml_payload: Vec<u8>,
        signature_b64: &str,
        issuer_public_pem: &str,
    ) -> Result<Cml, CoreError> {
        if !self.orgs.exists(org_id).await.map_err(CoreError::from)? {
            return Err(CoreError::NotFound(format!("organization {org_id}")));
        }

        let document = self.verify_and_parse(org_id, &cml_payload, signature_b64, issuer_public_pem)?;

        let now = Timestamp::now();
        let row = Cml {
            id: CmlId::new(),
            org_id: org_id.clone(),
            max_sites: document.max_sites,
            validity: Timestamp::from_datetime(document.validity),
            feature_packs: document.feature_packs,
            cml_payload,
            signature: signature_b64.to_string(),
            issuer_public_pem: issuer_public_pem.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.repo.insert(row).await.map_err(CoreError::from)
    }

    /// Look up the CML for `org_id`. A missing row surfaces as
    /// [`CoreError::CmlMissing`] rather than the generic `NotFound` —
    /// there is no lazy-default CML synthesized on a miss.
    pub async fn get(&self, org_id: &OrgId) -> Result<Cml, CoreError> {
        self.repo.get(org_id).await.map_err(|err| match err {
            license_storage::StorageError::NotFound(_) => CoreError::CmlMissing(org_id.to_string()),
            other => CoreError::from(other),
        })
    }

    /// Replace the payload/signature/capacity of an existing CML.
    /// `new_signature_b64` must verify under the same `issuer_public_pem`
    /// recorded at upload — refresh cannot re-key a CML.
    pub async fn refresh(
        &self,
        org_id: &OrgId,
        new_cml_payload: Vec<u8>,
        new_signature_b64: &str,
    ) -> Result<Cml, CoreError> {
        let existing = self.get(org_id).await?;
        let document = self.verify_and_parse(
            org_id,
            &new_cml_payload,
            new_signature_b64,
            &existing.issuer_public_pem,
        )?;

        let row = Cml {
            max_sites: document.max_sites,
            validity: Timestamp::from_datetime(document.validity),
            feature_packs: document.feature_packs,
            cml_payload: new_cml_payload,
            signature: new_signature_b64.to_string(),
            updated_at: Timestamp::now(),
            ..existing
        };
        self.repo.replace(row).await.map_err(CoreError::from)
    }

    fn verify_and_parse(
        &self,
        org_id: &OrgId,
        cml_payload: &[u8],
        signature_b64: &str,
        issuer_public_pem: &str,
    ) -> Result<CmlDocument, CoreError> {
        let verifying = OrgVerifyingKey::from_spki_pem(issuer_public_pem).map_err(CoreError::from)?;
        let wrapped = CanonicalBytes::from_raw_trusted(cml_payload.to_vec());
        verify_raw(&wrapped, &decode_signature(signature_b64)?, &verifying).map_err(CoreError::from)?;

        let document: CmlDocument = serde_json::from_slice(cml_payload)
            .map_err(|e| CoreError::Malformed(format!("cml_payload is not a valid CML document: {e}")))?;
        if document.org_id != org_id.as_str() {
            return Err(CoreError::Malformed(format!(
                "cml_payload org_id {} does not match target organization {org_id}",
                document.org_id
            )));
        }
        Ok(document)
    }
}

fn decode_signature(signature_b64: &str) -> Result<Vec<u8>, CoreError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(signature_b64.trim())
        .map_err(|e| CoreError::Malformed(format!("signature is not valid base64: {e}")))
}
