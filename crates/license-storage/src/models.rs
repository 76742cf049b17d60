//! Persisted entity definitions. These are the rows the trust plane's
//! component crates (`license-registry`, `license-vault`, `license-issuer`,
//! `license-keystore`, `license-manifest`, `license-ledger`) read and write
//! through the repository traits in [`crate::repository`].

use std::collections::BTreeMap;

use license_core::{CmlId, KeyId, ManifestId, OrgId, OrgKeyId, SiteId, SiteLicenseId, Timestamp, UsageEntryId};
use serde::{Deserialize, Serialize};

/// An organization known to the system. Minted explicitly — there is no
/// implicit-creation path for `org_id`. CML, OrgKey, SiteLicense, and
/// ledger rows all reference `org_id` as a foreign key into this table;
/// `CMLRegistry::upload` requires the target `org_id` to already exist
/// here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    /// Opaque, globally-unique organization identifier.
    pub org_id: OrgId,
    /// Human-readable display name.
    pub display_name: String,
    /// Creation instant.
    pub created_at: Timestamp,
}

/// A Customer Master License row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cml {
    /// Row identifier.
    pub id: CmlId,
    /// Owning organization (unique key).
    pub org_id: OrgId,
    /// Maximum number of concurrently active Site Licenses.
    pub max_sites: u32,
    /// Expiry instant of the grant.
    pub validity: Timestamp,
    /// Ordered set of feature pack names.
    pub feature_packs: Vec<String>,
    /// Canonical serialization of the issuer-authored CML document.
    pub cml_payload: Vec<u8>,
    /// Base64-std ECDSA-P256 signature over `cml_payload`.
    pub signature: String,
    /// SPKI PEM of the public key the signature was verified against at
    /// upload. `refresh` must verify against this same key.
    pub issuer_public_pem: String,
    /// Row creation instant.
    pub created_at: Timestamp,
    /// Last time the payload/signature were replaced.
    pub updated_at: Timestamp,
}

/// Site/key variant a Site License or OrgKey was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Development key.
    Dev,
    /// Production key.
    Prod,
}

/// Lifecycle status of a Site License. Rows are never deleted; revocation
/// is a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    /// Counts toward the org's `max_sites` limit.
    Active,
    /// Tombstoned; does not count toward capacity.
    Revoked,
}

/// A Site License row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteLicense {
    /// Row identifier.
    pub id: SiteLicenseId,
    /// Caller-supplied site installation identifier, unique within the org.
    pub site_id: SiteId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Opaque installation-identifying key/value bag.
    pub fingerprint: BTreeMap<String, String>,
    /// Canonical serialization of the license document.
    pub license_payload: Vec<u8>,
    /// Base64-std org-ECDSA-P256 signature over `license_payload`.
    pub signature: String,
    /// Issuance instant.
    pub issued_at: Timestamp,
    /// Expiry instant (never later than the parent CML's validity).
    pub expires_at: Timestamp,
    /// Last heartbeat instant.
    pub last_seen: Timestamp,
    /// Current lifecycle status.
    pub status: SiteStatus,
    /// Which org signing key (dev/prod) this license was signed with.
    pub key_type: KeyType,
}

/// An organization's signing keypair row. Private material is always at
/// rest as ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgKey {
    /// Row identifier.
    pub id: OrgKeyId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Dev or prod key.
    pub key_type: KeyType,
    /// `base64_std(salt(32) || nonce(12) || aes_256_gcm_ciphertext_with_tag)`.
    pub private_enc: String,
    /// SPKI PEM of the paired public key.
    pub public_pem: String,
    /// Row creation instant.
    pub created_at: Timestamp,
}

/// Tag distinguishing a KMS-resident symmetric secret from an asymmetric
/// keypair. A sum type with a common header, per the polymorphism design
/// note: avoid a class hierarchy, dispatch on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// A 32-byte AES-256 secret.
    Symmetric,
    /// An Ed25519 keypair.
    Asymmetric,
}

/// Lifecycle status of a KMS key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// Usable for validation/download.
    Active,
    /// Tombstoned.
    Revoked,
}

/// A KMS-resident key row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmsKey {
    /// Row identifier.
    pub id: KeyId,
    /// Symmetric or asymmetric.
    pub kind: KeyKind,
    /// Raw 32-byte Ed25519 public key, base64-std. Only present when
    /// `kind == Asymmetric`.
    pub public: Option<String>,
    /// `nonce(12) || gcm_seal(plaintext)`, base64-std. Sealed under the
    /// process-wide master key.
    pub encrypted_private: String,
    /// Expiry instant.
    pub expires_at: Timestamp,
    /// Row creation instant.
    pub created_at: Timestamp,
    /// Current lifecycle status.
    pub status: KeyStatus,
    /// Monotonically increasing version, bumped on every mutation
    /// (`refresh_expiry`, `revoke` — including a revoke of an
    /// already-revoked key).
    pub version: u64,
}

/// Kind of event recorded in the usage ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    /// A Site License was issued.
    SiteIssued,
    /// A site sent a heartbeat.
    Heartbeat,
    /// A Site License was revoked.
    Revoked,
    /// A usage manifest was successfully emitted to the root authority.
    ManifestEmitted,
}

/// An append-only usage ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLedgerEntry {
    /// Row identifier.
    pub id: UsageEntryId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Event kind.
    pub entry_type: LedgerEntryType,
    /// The site this entry concerns, when applicable.
    pub site_id: Option<SiteId>,
    /// Opaque event payload.
    pub data: serde_json::Value,
    /// Optional org-signed MAC over `data`. Not validated by the ledger
    /// itself — an unvalidated, optional integrity tag.
    pub signature: Option<String>,
    /// Row creation instant.
    pub created_at: Timestamp,
}

/// A periodic, org-signed usage rollup emitted to the root authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageManifest {
    /// Row identifier.
    pub id: ManifestId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Reporting period, formatted `Qn_YYYY`.
    pub period: String,
    /// Canonical serialization of the manifest document.
    pub manifest_payload: Vec<u8>,
    /// Base64-std org signature over `manifest_payload`.
    pub signature: String,
    /// Whether emission to the root authority has succeeded.
    pub sent_to_root: bool,
    /// Instant emission succeeded, if it has.
    pub sent_at: Option<Timestamp>,
    /// Row creation instant.
    pub created_at: Timestamp,
}
