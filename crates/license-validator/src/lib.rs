//! Offline S0-S5 Site License chain validation.
//!
//! Everything a validator needs travels in [`ValidationRequest`] as raw
//! presented bytes — there is no storage dependency here. The caller
//! (the façade, in practice) is responsible for sourcing `org_public_pem`
//! and `cml_payload_bytes`/`cml_signature_b64` from whatever CML/OrgKey
//! rows it trusts before handing them to [`validate`].

use std::collections::BTreeMap;

use license_core::Timestamp;
use license_core::CanonicalBytes;
use license_crypto::ecdsa::{EcdsaSignature, OrgVerifyingKey};
use serde::Deserialize;
use thiserror::Error;

const GRACE_PERIOD_DAYS: i64 = 30;

/// Everything [`validate`] needs, all presented as raw wire bytes.
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    /// Canonical serialization of the presented Site License document.
    pub license_payload_bytes: Vec<u8>,
    /// Base64-std org signature over `license_payload_bytes`.
    pub site_signature_b64: String,
    /// SPKI PEM of the org's public key.
    pub org_public_pem: String,
    /// Canonical serialization of the org's CML document.
    pub cml_payload_bytes: Vec<u8>,
    /// Base64-std root signature over `cml_payload_bytes`.
    pub cml_signature_b64: String,
    /// SPKI PEM of the root authority's public key. If absent, the CML
    /// signature step is skipped and a warning is attached instead.
    pub root_public_pem: Option<String>,
    /// Caller-presented fingerprint to soft-check against the license.
    pub presented_fingerprint: Option<BTreeMap<String, String>>,
    /// The instant validation is evaluated at.
    pub now: Timestamp,
}

/// Why a chain failed to validate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidReason {
    /// A payload did not parse.
    #[error("malformed: {0}")]
    Malformed(String),
    /// The site signature did not verify under `org_public_pem`.
    #[error("site signature does not verify under the org public key")]
    SiteSignature,
    /// The CML signature did not verify under `root_public_pem`.
    #[error("CML signature does not verify under the root public key")]
    CmlSignature,
    /// `parent_cml`/`parent_cml_sig` do not match the presented CML.
    #[error("site license is not linked to the presented CML")]
    ChainMismatch,
    /// Past `expires_at` and past the grace period.
    #[error("license expired outside the grace period")]
    Expired,
}

/// Terminal outcome of a chain validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Every check passed within the ordinary validity window.
    Valid,
    /// Past `expires_at` but within the 30-day grace period.
    ValidWithGrace,
    /// A hard failure — the reason names the step that rejected it.
    Invalid(InvalidReason),
    /// Otherwise valid (or valid-with-grace), but one or more soft
    /// checks (missing root key, fingerprint mismatch) did not hold.
    Warning(Vec<String>),
}

#[derive(Deserialize)]
struct SitePayload {
    parent_cml: String,
    parent_cml_sig: String,
    #[serde(default)]
    fingerprint: BTreeMap<String, String>,
    expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
struct CmlDocument {
    org_id: String,
}

/// Validate a presented Site License against the S0-S5 state machine.
pub fn validate(request: &ValidationRequest) -> ValidationOutcome {
    let mut warnings = Vec::new();

    let site: SitePayload = match serde_json::from_slice(&request.license_payload_bytes) {
        Ok(v) => v,
        Err(e) => return ValidationOutcome::Invalid(InvalidReason::Malformed(format!("license_payload: {e}"))),
    };
    let cml: CmlDocument = match serde_json::from_slice(&request.cml_payload_bytes) {
        Ok(v) => v,
        Err(e) => return ValidationOutcome::Invalid(InvalidReason::Malformed(format!("cml_payload: {e}"))),
    };

    let org_key = match OrgVerifyingKey::from_spki_pem(&request.org_public_pem) {
        Ok(k) => k,
        Err(e) => return ValidationOutcome::Invalid(InvalidReason::Malformed(format!("org_public_pem: {e}"))),
    };
    let site_sig = match EcdsaSignature::from_base64(&request.site_signature_b64) {
        Ok(s) => s,
        Err(_) => return ValidationOutcome::Invalid(InvalidReason::SiteSignature),
    };
    let site_bytes = CanonicalBytes::from_raw_trusted(request.license_payload_bytes.clone());
    if org_key.verify(&site_bytes, &site_sig).is_err() {
        return ValidationOutcome::Invalid(InvalidReason::SiteSignature);
    }

    match &request.root_public_pem {
        Some(root_pem) => {
            let root_key = match OrgVerifyingKey::from_spki_pem(root_pem) {
                Ok(k) => k,
                Err(e) => {
                    return ValidationOutcome::Invalid(InvalidReason::Malformed(format!(
                        "root_public_pem: {e}"
                    )))
                }
            };
            let cml_sig = match EcdsaSignature::from_base64(&request.cml_signature_b64) {
                Ok(s) => s,
                Err(_) => return ValidationOutcome::Invalid(InvalidReason::CmlSignature),
            };
            let cml_bytes = CanonicalBytes::from_raw_trusted(request.cml_payload_bytes.clone());
            if root_key.verify(&cml_bytes, &cml_sig).is_err() {
                return ValidationOutcome::Invalid(InvalidReason::CmlSignature);
            }
        }
        None => warnings.push("root_public_pem absent; CML signature was not verified".to_string()),
    }

    let expires_at = Timestamp::from_datetime(site.expires_at);
    let grace_deadline = expires_at.plus_days(GRACE_PERIOD_DAYS);
    let verdict = if request.now <= expires_at {
        ValidationOutcome::Valid
    } else if request.now <= grace_deadline {
        ValidationOutcome::ValidWithGrace
    } else {
        return ValidationOutcome::Invalid(InvalidReason::Expired);
    };

    if let Some(presented) = &request.presented_fingerprint {
        for (key, value) in presented {
            match site.fingerprint.get(key) {
                Some(actual) if actual == value => {}
                _ => warnings.push(format!("fingerprint mismatch for key {key}")),
            }
        }
    }

    if site.parent_cml != cml.org_id || site.parent_cml_sig != request.cml_signature_b64 {
        return ValidationOutcome::Invalid(InvalidReason::ChainMismatch);
    }

    if warnings.is_empty() {
        verdict
    } else {
        ValidationOutcome::Warning(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use license_crypto::ecdsa::generate_signing_keypair;
    use serde_json::json;

    struct Chain {
        license_payload_bytes: Vec<u8>,
        site_signature_b64: String,
        org_public_pem: String,
        cml_payload_bytes: Vec<u8>,
        cml_signature_b64: String,
        root_public_pem: String,
    }

    fn build_chain(expires_at: &str) -> Chain {
        let (root_signing, root_verifying) = generate_signing_keypair();
        let (org_signing, org_verifying) = generate_signing_keypair();

        let cml_payload_bytes = serde_json::to_vec(&json!({
            "org_id": "acme",
            "max_sites": 2,
            "validity": "2026-01-01T00:00:00Z",
        }))
        .unwrap();
        let cml_sig = root_signing.sign(&CanonicalBytes::from_raw_trusted(cml_payload_bytes.clone()));

        let license_payload_bytes = serde_json::to_vec(&json!({
            "type": "site_license",
            "site_id": "s1",
            "parent_cml": "acme",
            "parent_cml_sig": cml_sig.to_base64(),
            "fingerprint": {"addr": "10.0.0.1"},
            "issued_at": "2025-01-01T00:00:00Z",
            "expires_at": expires_at,
            "features": ["core"],
        }))
        .unwrap();
        let site_sig = org_signing.sign(&CanonicalBytes::from_raw_trusted(license_payload_bytes.clone()));

        Chain {
            license_payload_bytes,
            site_signature_b64: site_sig.to_base64(),
            org_public_pem: org_verifying.to_spki_pem().unwrap(),
            cml_payload_bytes,
            cml_signature_b64: cml_sig.to_base64(),
            root_public_pem: root_verifying.to_spki_pem().unwrap(),
        }
    }

    fn request_at(chain: &Chain, now: Timestamp) -> ValidationRequest {
        ValidationRequest {
            license_payload_bytes: chain.license_payload_bytes.clone(),
            site_signature_b64: chain.site_signature_b64.clone(),
            org_public_pem: chain.org_public_pem.clone(),
            cml_payload_bytes: chain.cml_payload_bytes.clone(),
            cml_signature_b64: chain.cml_signature_b64.clone(),
            root_public_pem: Some(chain.root_public_pem.clone()),
            presented_fingerprint: None,
            now,
        }
    }

    #[test]
    fn happy_path_is_valid() {
        let chain = build_chain("2025-06-01T00:00:00Z");
        let now = Timestamp::from_datetime("2025-01-15T00:00:00Z".parse().unwrap());
        let outcome = validate(&request_at(&chain, now));
        assert_eq!(outcome, ValidationOutcome::Valid);
    }

    #[test]
    fn tampered_cml_signature_invalidates_at_cml_step() {
        let mut chain = build_chain("2025-06-01T00:00:00Z");
        let mut sig_bytes = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            &chain.cml_signature_b64,
        )
        .unwrap();
        sig_bytes[0] ^= 0xFF;
        chain.cml_signature_b64 =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, sig_bytes);

        let now = Timestamp::from_datetime("2025-01-15T00:00:00Z".parse().unwrap());
        let outcome = validate(&request_at(&chain, now));
        assert_eq!(outcome, ValidationOutcome::Invalid(InvalidReason::CmlSignature));
    }

    #[test]
    fn grace_period_edges() {
        let chain = build_chain("2025-01-02T00:00:00Z");

        let within_grace = Timestamp::from_datetime("2025-01-21T00:00:00Z".parse().unwrap());
        assert_eq!(
            validate(&request_at(&chain, within_grace)),
            ValidationOutcome::ValidWithGrace
        );

        let past_grace = Timestamp::from_datetime("2025-02-05T00:00:00Z".parse().unwrap());
        assert_eq!(
            validate(&request_at(&chain, past_grace)),
            ValidationOutcome::Invalid(InvalidReason::Expired)
        );
    }

    #[test]
    fn missing_root_key_warns_instead_of_invalidating() {
        let chain = build_chain("2025-06-01T00:00:00Z");
        let now = Timestamp::from_datetime("2025-01-15T00:00:00Z".parse().unwrap());
        let mut request = request_at(&chain, now);
        request.root_public_pem = None;
        let outcome = validate(&request);
        assert!(matches!(outcome, ValidationOutcome::Warning(_)));
    }

    #[test]
    fn fingerprint_mismatch_is_a_warning_not_invalidation() {
        let chain = build_chain("2025-06-01T00:00:00Z");
        let now = Timestamp::from_datetime("2025-01-15T00:00:00Z".parse().unwrap());
        let mut request = request_at(&chain, now);
        let mut presented = BTreeMap::new();
        presented.insert("addr".to_string(), "192.168.0.1".to_string());
        request.presented_fingerprint = Some(presented);
        let outcome = validate(&request);
        assert!(matches!(outcome, ValidationOutcome::Warning(_)));
    }

    #[test]
    fn chain_mismatch_detected_when_parent_cml_sig_disagrees() {
        let chain = build_chain("2025-06-01T00:00:00Z");
        let now = Timestamp::from_datetime("2025-01-15T00:00:00Z".parse().unwrap());
        let mut request = request_at(&chain, now);
        request.cml_signature_b64 = {
            let (other_signing, _) = generate_signing_keypair();
            other_signing
                .sign(&CanonicalBytes::from_raw_trusted(chain.cml_payload_bytes.clone()))
                .to_base64()
        };
        request.root_public_pem = None;
        let outcome = validate(&request);
        assert_eq!(outcome, ValidationOutcome::Invalid(InvalidReason::ChainMismatch));
    }
}
