//! Shared application state, handed to every route handler via Axum's
//! `State` extractor.

use std::sync::Arc;

use license_file::LicenseFileBundler;
use license_issuer::SiteIssuer;
use license_keystore::{KeyStore, MasterKey};
use license_ledger::UsageLedger;
use license_manifest::ManifestEmitter;
use license_registry::{CmlRegistry, OrganizationRegistry};
use license_storage::SiteLicenseRepository;
use license_vault::OrgKeyVault;

/// Every collaborator a route handler might need, already wired
/// together. Cheap to clone — every field is either an `Arc` or a
/// small `Copy`/cheaply-cloned value.
#[derive(Clone)]
pub struct AppState {
    /// Organization creation/lookup.
    pub orgs: Arc<OrganizationRegistry>,
    /// Customer Master License upload/lookup/refresh.
    pub cmls: Arc<CmlRegistry>,
    /// Per-organization ECDSA signing keys.
    pub vault: Arc<OrgKeyVault>,
    /// Site License issuance, heartbeat, revocation.
    pub issuer: Arc<SiteIssuer>,
    /// Usage manifest generation and emission.
    pub manifests: Arc<ManifestEmitter>,
    /// KMS-resident symmetric/asymmetric key store.
    pub keystore: Arc<KeyStore>,
    /// Self-contained license file generation/validation.
    pub files: Arc<LicenseFileBundler>,
    /// Append-only usage ledger, read side.
    pub ledger: Arc<UsageLedger>,
    /// Direct repository access for read paths (`GET /sites`, `GET
    /// /sites/:id`) that have no dedicated business-logic method on
    /// [`SiteIssuer`] because they mutate nothing.
    pub sites_repo: Arc<dyn SiteLicenseRepository>,
    /// Process-wide master key, kept alongside the one already moved
    /// into `keystore` so [`LicenseFileBundler::generate`]/`validate`
    /// callers (which take it by reference) don't need to reach back
    /// into `keystore`'s private state.
    pub master_key: MasterKey,
    /// SPKI PEM of the root authority's public key, when configured.
    /// Threaded into every [`license_validator::ValidationRequest`].
    pub root_public_pem: Option<String>,
    /// `JWT_SECRET`, handed to the auth middleware's `State` extractor
    /// so it can derive the 32-byte HMAC key per request without
    /// re-reading the environment.
    pub jwt_secret: Arc<str>,
}
