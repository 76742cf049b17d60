//! Self-contained, HMAC-tagged license files.
//!
//! A [`LicenseFile`] carries its own integrity tag: generation
//! canonicalizes the struct with `signature` blanked, HMAC-SHA256s that
//! under the KMS master key, and re-canonicalizes the signed struct as
//! the artifact. Validation reverses the process and cross-references
//! the bound `key_id` against live [`license_keystore::KeyStore`] state
//! so a file signed against a key that has since expired or been
//! revoked is caught even though the file bytes themselves never change.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine;
use license_core::{CanonicalBytes, CoreError, KeyId, LicenseId, Timestamp};
use license_crypto::hmac;
use license_keystore::{KeyStore, MasterKey};
use license_storage::models::{KeyKind, KeyStatus};
use serde::{Deserialize, Serialize};

/// A portable, signed license artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseFile {
    /// Identifier for this generated license.
    pub license_id: LicenseId,
    /// Caller-chosen license type tag (e.g. `"perpetual"`, `"trial"`).
    pub license_type: String,
    /// The KMS key this file is bound to.
    pub key_id: KeyId,
    /// Symmetric or asymmetric — the bound key's kind.
    #[serde(rename = "key_type")]
    pub key_kind: KeyKind,
    /// The bound key's public half, when asymmetric.
    pub public_key: Option<String>,
    /// Generation instant.
    pub issued_at: Timestamp,
    /// Expiry instant.
    pub expires_at: Timestamp,
    /// Caller-supplied opaque metadata.
    pub metadata: BTreeMap<String, String>,
    /// Base64-std HMAC-SHA256 tag over the canonical serialization with
    /// this field blanked. Empty until [`LicenseFileBundler::generate`]
    /// computes it.
    #[serde(default)]
    pub signature: String,
}

/// Why a presented license file failed to validate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileInvalidReason {
    /// The bytes did not parse as a `LicenseFile`.
    Malformed(String),
    /// `signature` was empty.
    MissingSignature,
    /// The recomputed tag did not match the presented one.
    BadSignature,
    /// Past `expires_at`. Metadata is still returned.
    Expired,
    /// `key_id` has no KMS row.
    UnknownKey,
    /// The bound KMS key has been revoked.
    Revoked,
}

/// Terminal outcome of [`LicenseFileBundler::validate`].
#[derive(Debug, Clone)]
pub enum FileValidationOutcome {
    /// Every check passed.
    Valid(LicenseFile),
    /// A check failed. `parsed` is populated whenever the bytes parsed
    /// far enough to recover a `LicenseFile` — notably for `Expired`,
    /// where the caller still wants the metadata.
    Invalid {
        /// Which step rejected the file.
        reason: FileInvalidReason,
        /// The parsed file, when parsing succeeded.
        parsed: Option<LicenseFile>,
    },
}

impl FileValidationOutcome {
    fn invalid(reason: FileInvalidReason, parsed: Option<LicenseFile>) -> Self {
        Self::Invalid { reason, parsed }
    }
}

/// Generates and validates [`LicenseFile`] artifacts against a
/// [`KeyStore`].
pub struct LicenseFileBundler {
    store: Arc<KeyStore>,
}

impl LicenseFileBundler {
    /// Wrap the key store to generate/validate against.
    pub fn new(store: Arc<KeyStore>) -> Self {
        Self { store }
    }

    /// Generate a signed license file bound to `key_id`. Rejects an
    /// expired or revoked key before ever building the document.
    pub async fn generate(
        &self,
        key_id: &KeyId,
        license_type: impl Into<String>,
        expires_at: Timestamp,
        metadata: BTreeMap<String, String>,
        master_key: &MasterKey,
    ) -> Result<Vec<u8>, CoreError> {
        let key = self.store.get(key_id).await?;
        if key.status == KeyStatus::Revoked {
            return Err(CoreError::Revoked(format!("KMS key {key_id}")));
        }
        let now = Timestamp::now();
        if now.as_datetime() > key.expires_at.as_datetime() {
            return Err(CoreError::Expired {
                expired_at: key.expires_at.to_canonical_string(),
            });
        }

        let mut file = LicenseFile {
            license_id: LicenseId::new(),
            license_type: license_type.into(),
            key_id: *key_id,
            key_kind: key.kind,
            public_key: key.public.clone(),
            issued_at: now,
            expires_at,
            metadata,
            signature: String::new(),
        };

        let unsigned = CanonicalBytes::new(&file).map_err(CoreError::from)?;
        let tag = hmac::hmac_sha256(master_key.as_bytes(), unsigned.as_bytes()).map_err(CoreError::from)?;
        file.signature = base64::engine::general_purpose::STANDARD.encode(tag);

        let signed = CanonicalBytes::new(&file).map_err(CoreError::from)?;
        Ok(signed.as_bytes().to_vec())
    }

    /// Validate a presented license file's bytes against the bound key's
    /// live state. Never returns `Err` — every failure mode is a
    /// [`FileInvalidReason`] variant instead, since an invalid license
    /// file is an expected outcome, not an exceptional one.
    pub async fn validate(&self, file_bytes: &[u8], master_key: &MasterKey) -> FileValidationOutcome {
        let parsed: LicenseFile = match serde_json::from_slice(file_bytes) {
            Ok(v) => v,
            Err(e) => return FileValidationOutcome::invalid(FileInvalidReason::Malformed(e.to_string()), None),
        };

        if parsed.signature.is_empty() {
            return FileValidationOutcome::invalid(FileInvalidReason::MissingSignature, Some(parsed));
        }

        let mut unsigned = parsed.clone();
        unsigned.signature = String::new();
        let canonical = match CanonicalBytes::new(&unsigned) {
            Ok(c) => c,
            Err(_) => return FileValidationOutcome::invalid(FileInvalidReason::BadSignature, Some(parsed)),
        };
        let presented_tag = match base64::engine::general_purpose::STANDARD.decode(parsed.signature.trim()) {
            Ok(t) => t,
            Err(_) => return FileValidationOutcome::invalid(FileInvalidReason::BadSignature, Some(parsed)),
        };
        let tag_matches =
            hmac::verify(master_key.as_bytes(), canonical.as_bytes(), &presented_tag).unwrap_or(false);
        if !tag_matches {
            return FileValidationOutcome::invalid(FileInvalidReason::BadSignature, Some(parsed));
        }

        if Timestamp::now().as_datetime() > parsed.expires_at.as_datetime() {
            return FileValidationOutcome::invalid(FileInvalidReason::Expired, Some(parsed));
        }

        let key = match self.store.get(&parsed.key_id).await {
            Ok(k) => k,
            Err(_) => return FileValidationOutcome::invalid(FileInvalidReason::UnknownKey, Some(parsed)),
        };
        if key.status == KeyStatus::Revoked {
            return FileValidationOutcome::invalid(FileInvalidReason::Revoked, Some(parsed));
        }

        FileValidationOutcome::Valid(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use license_keystore::{KeyMaterial, MasterKey};
    use license_storage::memory::MemoryKeyStoreRepository;

    fn bundler() -> (LicenseFileBundler, MasterKey) {
        let master_key = MasterKey::from_bytes([11u8; 32]).unwrap();
        let store = Arc::new(KeyStore::new(Arc::new(MemoryKeyStoreRepository::new()), master_key));
        (LicenseFileBundler::new(store), master_key)
    }

    #[tokio::test]
    async fn generate_then_validate_is_valid_for_active_key() {
        let (bundler, master_key) = bundler();
        let info = bundler
            .store
            .register(KeyKind::Asymmetric, None, 3600)
            .await
            .unwrap();

        let mut metadata = BTreeMap::new();
        metadata.insert("tier".to_string(), "gold".to_string());
        let expires_at = Timestamp::now().plus_days(30);
        let bytes = bundler
            .generate(&info.id, "perpetual", expires_at, metadata, &master_key)
            .await
            .unwrap();

        let outcome = bundler.validate(&bytes, &master_key).await;
        assert!(matches!(outcome, FileValidationOutcome::Valid(_)));
    }

    #[tokio::test]
    async fn bit_flip_in_serialized_file_is_bad_signature() {
        let (bundler, master_key) = bundler();
        let info = bundler
            .store
            .register(KeyKind::Asymmetric, None, 3600)
            .await
            .unwrap();
        let expires_at = Timestamp::now().plus_days(30);
        let mut bytes = bundler
            .generate(&info.id, "perpetual", expires_at, BTreeMap::new(), &master_key)
            .await
            .unwrap();

        let flip_at = bytes.len() / 2;
        bytes[flip_at] ^= 0xFF;

        let outcome = bundler.validate(&bytes, &master_key).await;
        assert!(matches!(
            outcome,
            FileValidationOutcome::Invalid {
                reason: FileInvalidReason::BadSignature | FileInvalidReason::Malformed(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn revoking_the_bound_key_invalidates_an_unmodified_file() {
        let (bundler, master_key) = bundler();
        let info = bundler
            .store
            .register(KeyKind::Symmetric, Some(KeyMaterial::Symmetric(vec![5u8; 32])), 3600)
            .await
            .unwrap();
        let expires_at = Timestamp::now().plus_days(30);
        let bytes = bundler
            .generate(&info.id, "perpetual", expires_at, BTreeMap::new(), &master_key)
            .await
            .unwrap();

        bundler.store.revoke(&info.id).await.unwrap();

        let outcome = bundler.validate(&bytes, &master_key).await;
        assert!(matches!(
            outcome,
            FileValidationOutcome::Invalid {
                reason: FileInvalidReason::Revoked,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn generate_rejects_already_revoked_key() {
        let (bundler, master_key) = bundler();
        let info = bundler
            .store
            .register(KeyKind::Symmetric, None, 3600)
            .await
            .unwrap();
        bundler.store.revoke(&info.id).await.unwrap();

        let result = bundler
            .generate(&info.id, "perpetual", Timestamp::now().plus_days(1), BTreeMap::new(), &master_key)
            .await;
        assert!(matches!(result, Err(CoreError::Revoked(_))));
    }

    #[tokio::test]
    async fn missing_signature_field_is_detected() {
        let (bundler, master_key) = bundler();
        let info = bundler
            .store
            .register(KeyKind::Symmetric, None, 3600)
            .await
            .unwrap();
        let file = LicenseFile {
            license_id: LicenseId::new(),
            license_type: "trial".to_string(),
            key_id: info.id,
            key_kind: KeyKind::Symmetric,
            public_key: None,
            issued_at: Timestamp::now(),
            expires_at: Timestamp::now().plus_days(1),
            metadata: BTreeMap::new(),
            signature: String::new(),
        };
        let bytes = serde_json::to_vec(&file).unwrap();
        let outcome = bundler.validate(&bytes, &master_key).await;
        assert!(matches!(
            outcome,
            FileValidationOutcome::Invalid {
                reason: FileInvalidReason::MissingSignature,
                ..
            }
        ));
    }
}
