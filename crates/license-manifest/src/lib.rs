//! Usage manifest generation and emission to the root authority.
//!
//! Generation aggregates an organization's active Site Licenses into a
//! signed, canonical document and persists it unsent. Emission is a
//! bounded exponential backoff: base 1s, multiplier 2, at most 3
//! attempts (delays 0s, 1s, 2s), a 10s per-attempt timeout, and a 4xx
//! response treated as terminal rather than retried.

use std::time::Duration;

use license_core::{CanonicalBytes, CoreError, ManifestId, OrgId, Timestamp, UsageEntryId};
use license_storage::models::{KeyType, LedgerEntryType, UsageLedgerEntry, UsageManifest};
use license_storage::{SiteLicenseRepository, UsageManifestRepository};
use license_vault::OrgKeyVault;
use serde_json::json;
use std::sync::Arc;

const MAX_ATTEMPTS: u32 = 3;
const BASE_DELAY_SECS: u64 = 1;
const REQUEST_TIMEOUT_SECS: u64 = 10;
const BODY_EXCERPT_LEN: usize = 200;

/// Aggregates, signs, and emits usage manifests.
pub struct ManifestEmitter {
    sites: Arc<dyn SiteLicenseRepository>,
    manifests: Arc<dyn UsageManifestRepository>,
    vault: Arc<OrgKeyVault>,
    http: reqwest::Client,
}

impl ManifestEmitter {
    /// Wrap the collaborators a manifest generation/emission cycle needs.
    /// The ledger append on emission is the `manifests` repository's own
    /// responsibility (see [`UsageManifestRepository::mark_sent_with_ledger_entry`]),
    /// so no separate ledger handle is needed here.
    pub fn new(
        sites: Arc<dyn SiteLicenseRepository>,
        manifests: Arc<dyn UsageManifestRepository>,
        vault: Arc<OrgKeyVault>,
    ) -> Self {
        Self {
            sites,
            manifests,
            vault,
            http: reqwest::Client::new(),
        }
    }

    /// Aggregate every active site for `org_id` into a signed, unsent
    /// manifest for `period` (formatted `Qn_YYYY` by convention).
    pub async fn generate(
        &self,
        org_id: &OrgId,
        period: impl Into<String>,
        key_type: KeyType,
    ) -> Result<UsageManifest, CoreError> {
        let period = period.into();
        let active = self.sites.list_active(org_id).await.map_err(CoreError::from)?;
        let generated_at = Timestamp::now();

        let active_sites: Vec<_> = active
            .iter()
            .map(|site| {
                json!({
                    "site_id": site.site_id.as_str(),
                    "last_seen": site.last_seen.to_canonical_string(),
                })
            })
            .collect();
        let payload = json!({
            "type": "usage_manifest",
            "org_id": org_id.as_str(),
            "period": period,
            "generated_at": generated_at.to_canonical_string(),
            "active_sites": active_sites,
            "stats": {"active_count": active.len()},
        });
        let canonical = CanonicalBytes::new(&payload).map_err(CoreError::from)?;
        let signature = self.vault.sign(org_id, key_type, &canonical).await?;

        let row = UsageManifest {
            id: ManifestId::new(),
            org_id: org_id.clone(),
            period,
            manifest_payload: canonical.as_bytes().to_vec(),
            signature: signature.to_base64(),
            sent_to_root: false,
            sent_at: None,
            created_at: generated_at,
        };
        self.manifests.insert(row).await.map_err(CoreError::from)
    }

    /// POST a generated manifest to `endpoint` with bounded retry. On
    /// success, marks the manifest sent and appends a `manifest_emitted`
    /// ledger entry; the manifest stays `sent_to_root=false` on failure
    /// so the caller can retry emission later.
    pub async fn emit(&self, manifest_id: &ManifestId, endpoint: &str) -> Result<UsageManifest, CoreError> {
        let manifest = self.manifests.get(manifest_id).await.map_err(CoreError::from)?;
        let body = json!({
            "manifest_payload": base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                &manifest.manifest_payload,
            ),
            "signature": manifest.signature,
        });

        self.send_with_retry(endpoint, &body).await?;

        let sent_at = Timestamp::now();
        let entry = UsageLedgerEntry {
            id: UsageEntryId::new(),
            org_id: manifest.org_id.clone(),
            entry_type: LedgerEntryType::ManifestEmitted,
            site_id: None,
            data: json!({"manifest_id": manifest.id.to_string()}),
            signature: None,
            created_at: sent_at,
        };
        let (updated, _entry) = self
            .manifests
            .mark_sent_with_ledger_entry(manifest_id, sent_at, entry)
            .await
            .map_err(CoreError::from)?;

        Ok(updated)
    }

    async fn send_with_retry(&self, endpoint: &str, body: &serde_json::Value) -> Result<(), CoreError> {
        let mut last_detail = String::new();

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_secs(BASE_DELAY_SECS * 2u64.pow(attempt - 1));
                tracing::warn!(attempt, ?delay, "manifest emission failed, retrying");
                tokio::time::sleep(delay).await;
            }

            let sent = self
                .http
                .post(endpoint)
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .json(body)
                .send()
                .await;

            match sent {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) if resp.status().is_client_error() => {
                    let status = resp.status();
                    let excerpt = resp.text().await.unwrap_or_default();
                    return Err(CoreError::EmissionFailed(format!(
                        "{status} (terminal, not retried): {}",
                        truncate(&excerpt)
                    )));
                }
                Ok(resp) => last_detail = format!("http {}", resp.status()),
                Err(e) => last_detail = e.to_string(),
            }
        }

        Err(CoreError::EmissionFailed(format!(
            "exhausted {MAX_ATTEMPTS} attempts, last error: {last_detail}"
        )))
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
