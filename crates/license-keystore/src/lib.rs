//! Envelope-encrypted KMS key store.
//!
//! Persists [`license_storage::models::KmsKey`] rows under a 32-byte
//! process-wide master key (AES-256-GCM, `nonce(12) || ct_and_tag`, no
//! salt — the master key is the KDF-less root of this envelope). Exposes
//! `register`/`get`/`list`/`refresh_expiry`/`revoke`/`download`.
//!
//! `list` never returns sealed private bytes in a way a caller could
//! mistake for metadata-only; it returns the same full `KmsKey` row every
//! other method does, since [`license_storage::models::KmsKey`] never
//! holds plaintext — only [`KeyStore::download`] ever unseals.

mod master_key;

pub use master_key::MasterKey;

use std::sync::Arc;

use chrono::Duration;
use license_core::{CoreError, KeyId, Timestamp};
use license_crypto::ed25519;
use license_storage::models::{KeyKind, KeyStatus, KmsKey};
use license_storage::KeyStoreRepository;
use zeroize::Zeroizing;

/// Kind of material a caller may supply to [`KeyStore::register`].
pub enum KeyMaterial {
    /// Exactly 32 bytes of AES-256 secret.
    Symmetric(Vec<u8>),
    /// A 64-byte Ed25519 expanded secret (seed || public).
    Asymmetric([u8; 64]),
}

/// Metadata-only view of a key, safe to return from `list`/`register`.
#[derive(Debug, Clone)]
pub struct KeyInfo {
    /// Row identifier.
    pub id: KeyId,
    /// Symmetric or asymmetric.
    pub kind: KeyKind,
    /// Public half, base64-std, present only for asymmetric keys.
    pub public: Option<String>,
    /// Expiry instant.
    pub expires_at: Timestamp,
    /// Current lifecycle status.
    pub status: KeyStatus,
    /// Monotonic mutation counter.
    pub version: u64,
}

impl From<&KmsKey> for KeyInfo {
    fn from(key: &KmsKey) -> Self {
        Self {
            id: key.id,
            kind: key.kind,
            public: key.public.clone(),
            expires_at: key.expires_at,
            status: key.status,
            version: key.version,
        }
    }
}

/// The envelope-encrypted KMS key store.
pub struct KeyStore {
    repo: Arc<dyn KeyStoreRepository>,
    master_key: MasterKey,
}

impl KeyStore {
    /// Construct a store over a repository and the process-wide master key.
    pub fn new(repo: Arc<dyn KeyStoreRepository>, master_key: MasterKey) -> Self {
        Self { repo, master_key }
    }

    /// Register a key. If `material` is supplied it is validated for
    /// length/shape; otherwise fresh material is generated. Either way the
    /// plaintext is sealed under the master key before persisting, and the
    /// plaintext buffer is zeroed on every exit path including error.
    pub async fn register(
        &self,
        kind: KeyKind,
        material: Option<KeyMaterial>,
        ttl_seconds: i64,
    ) -> Result<KeyInfo, CoreError> {
        let now = Timestamp::now();
        let expires_at = Timestamp::from_datetime(*now.as_datetime() + Duration::seconds(ttl_seconds));

        let (public, plaintext) = self.prepare_material(kind, material)?;

        let sealed = license_crypto::aead::seal(self.master_key.as_bytes(), plaintext.as_ref())
            .map_err(CoreError::from)?;

        let key = KmsKey {
            id: KeyId::new(),
            kind,
            public,
            encrypted_private: base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                sealed,
            ),
            expires_at,
            created_at: now,
            status: KeyStatus::Active,
            version: 1,
        };

        let persisted = self.repo.insert(key).await.map_err(CoreError::from)?;
        Ok(KeyInfo::from(&persisted))
    }

    fn prepare_material(
        &self,
        kind: KeyKind,
        material: Option<KeyMaterial>,
    ) -> Result<(Option<String>, Zeroizing<Vec<u8>>), CoreError> {
        match (kind, material) {
            (KeyKind::Symmetric, Some(KeyMaterial::Symmetric(bytes))) => {
                if bytes.len() != 32 {
                    return Err(CoreError::Malformed(format!(
                        "symmetric key material must be exactly 32 bytes, got {}",
                        bytes.len()
                    )));
                }
                Ok((None, Zeroizing::new(bytes)))
            }
            (KeyKind::Symmetric, None) => {
                let mut buf = vec![0u8; 32];
                rand_core::RngCore::fill_bytes(&mut rand_core::OsRng, &mut buf);
                Ok((None, Zeroizing::new(buf)))
            }
            (KeyKind::Asymmetric, Some(KeyMaterial::Asymmetric(bytes))) => {
                let signing = ed25519::SigningKey::from_expanded_bytes(&bytes)
                    .map_err(CoreError::from)?;
                let public = signing.verifying_key().to_base64();
                Ok((Some(public), Zeroizing::new(bytes.to_vec())))
            }
            (KeyKind::Asymmetric, None) => {
                let signing = ed25519::SigningKey::generate(&mut rand_core::OsRng);
                let public = signing.verifying_key().to_base64();
                let expanded = signing.to_expanded_bytes();
                Ok((Some(public), Zeroizing::new(expanded.to_vec())))
            }
            (KeyKind::Symmetric, Some(KeyMaterial::Asymmetric(_)))
            | (KeyKind::Asymmetric, Some(KeyMaterial::Symmetric(_))) => Err(CoreError::Malformed(
                "key material kind does not match the requested key kind".to_string(),
            )),
        }
    }

    /// Look up the still-sealed row. `NotFound` on a miss.
    pub async fn get(&self, id: &KeyId) -> Result<KmsKey, CoreError> {
        self.repo.get(id).await.map_err(CoreError::from)
    }

    /// Metadata for every key — never unseals.
    pub async fn list(&self) -> Result<Vec<KeyInfo>, CoreError> {
        let rows = self.repo.list().await.map_err(CoreError::from)?;
        Ok(rows.iter().map(KeyInfo::from).collect())
    }

    /// Replace `expires_at` and bump `version`. Rejected when the key is
    /// already revoked.
    pub async fn refresh_expiry(&self, id: &KeyId, ttl_seconds: i64) -> Result<KeyInfo, CoreError> {
        let current = self.repo.get(id).await.map_err(CoreError::from)?;
        if current.status == KeyStatus::Revoked {
            return Err(CoreError::Revoked(format!("KMS key {id}")));
        }
        let mut next = current.clone();
        next.expires_at = Timestamp::from_datetime(
            *Timestamp::now().as_datetime() + Duration::seconds(ttl_seconds),
        );
        next.version = current.version + 1;
        let stored = self
            .repo
            .replace_cas(next, current.version)
            .await
            .map_err(CoreError::from)?;
        Ok(KeyInfo::from(&stored))
    }

    /// Tombstone the key. Idempotent in status; `version` always bumps,
    /// including on a revoke of an already-revoked key, preserving an
    /// audit-visible mutation counter.
    pub async fn revoke(&self, id: &KeyId) -> Result<KeyInfo, CoreError> {
        let current = self.repo.get(id).await.map_err(CoreError::from)?;
        let mut next = current.clone();
        next.status = KeyStatus::Revoked;
        next.version = current.version + 1;
        let stored = self
            .repo
            .replace_cas(next, current.version)
            .await
            .map_err(CoreError::from)?;
        Ok(KeyInfo::from(&stored))
    }

    /// The only operation that unseals. Operator-mediated export: returns
    /// metadata plus the decrypted material, both of which the caller must
    /// zero after the response is serialized.
    pub async fn download(&self, id: &KeyId) -> Result<(KeyInfo, Zeroizing<Vec<u8>>), CoreError> {
        let row = self.repo.get(id).await.map_err(CoreError::from)?;
        let sealed = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            &row.encrypted_private,
        )
        .map_err(|e| CoreError::Malformed(format!("encrypted_private is not valid base64: {e}")))?;
        let plaintext = license_crypto::aead::open(self.master_key.as_bytes(), &sealed)
            .map_err(CoreError::from)?;
        Ok((KeyInfo::from(&row), Zeroizing::new(plaintext)))
    }

    /// Validate presented material against the stored key without ever
    /// handing the plaintext back to the caller.
    pub async fn validate(
        &self,
        id: &KeyId,
        presented: &[u8],
    ) -> Result<ValidateOutcome, CoreError> {
        let row = self.repo.get(id).await.map_err(CoreError::from)?;
        if row.status == KeyStatus::Revoked {
            return Ok(ValidateOutcome {
                valid: false,
                revoked: true,
            });
        }
        let sealed = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            &row.encrypted_private,
        )
        .map_err(|e| CoreError::Malformed(format!("encrypted_private is not valid base64: {e}")))?;
        let plaintext = Zeroizing::new(
            license_crypto::aead::open(self.master_key.as_bytes(), &sealed)
                .map_err(CoreError::from)?,
        );
        let valid = license_crypto::constant_time_eq(plaintext.as_ref(), presented);
        Ok(ValidateOutcome {
            valid,
            revoked: false,
        })
    }
}

/// Outcome of [`KeyStore::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateOutcome {
    /// Whether the presented material matches the stored plaintext.
    pub valid: bool,
    /// Whether the key has been revoked (implies `valid == false`).
    pub revoked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use license_storage::memory::MemoryKeyStoreRepository;

    fn store() -> KeyStore {
        KeyStore::new(
            Arc::new(MemoryKeyStoreRepository::new()),
            MasterKey::from_bytes([7u8; 32]).unwrap(),
        )
    }

    #[tokio::test]
    async fn register_symmetric_generates_32_byte_material() {
        let store = store();
        let info = store.register(KeyKind::Symmetric, None, 3600).await.unwrap();
        assert_eq!(info.kind, KeyKind::Symmetric);
        assert!(info.public.is_none());
    }

    #[tokio::test]
    async fn register_rejects_wrong_length_symmetric_material() {
        let store = store();
        let result = store
            .register(KeyKind::Symmetric, Some(KeyMaterial::Symmetric(vec![0u8; 16])), 3600)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn register_then_validate_original_material_succeeds() {
        let store = store();
        let material = vec![9u8; 32];
        let info = store
            .register(KeyKind::Symmetric, Some(KeyMaterial::Symmetric(material.clone())), 3600)
            .await
            .unwrap();
        let outcome = store.validate(&info.id, &material).await.unwrap();
        assert!(outcome.valid);
        assert!(!outcome.revoked);
    }

    #[tokio::test]
    async fn validate_random_bytes_fails() {
        let store = store();
        let info = store
            .register(KeyKind::Symmetric, Some(KeyMaterial::Symmetric(vec![9u8; 32])), 3600)
            .await
            .unwrap();
        let outcome = store.validate(&info.id, &[1u8; 32]).await.unwrap();
        assert!(!outcome.valid);
    }

    #[tokio::test]
    async fn revoke_then_validate_reports_revoked() {
        let store = store();
        let info = store
            .register(KeyKind::Symmetric, Some(KeyMaterial::Symmetric(vec![9u8; 32])), 3600)
            .await
            .unwrap();
        store.revoke(&info.id).await.unwrap();
        let outcome = store.validate(&info.id, &[9u8; 32]).await.unwrap();
        assert!(!outcome.valid);
        assert!(outcome.revoked);
    }

    #[tokio::test]
    async fn revoke_is_idempotent_but_bumps_version() {
        let store = store();
        let info = store.register(KeyKind::Symmetric, None, 3600).await.unwrap();
        let first = store.revoke(&info.id).await.unwrap();
        let second = store.revoke(&info.id).await.unwrap();
        assert_eq!(first.status, KeyStatus::Revoked);
        assert_eq!(second.status, KeyStatus::Revoked);
        assert!(second.version > first.version);
    }

    #[tokio::test]
    async fn refresh_expiry_rejected_on_revoked_key() {
        let store = store();
        let info = store.register(KeyKind::Symmetric, None, 3600).await.unwrap();
        store.revoke(&info.id).await.unwrap();
        let result = store.refresh_expiry(&info.id, 7200).await;
        assert!(matches!(result, Err(CoreError::Revoked(_))));
    }

    #[tokio::test]
    async fn download_unseals_original_material() {
        let store = store();
        let material = vec![3u8; 32];
        let info = store
            .register(KeyKind::Symmetric, Some(KeyMaterial::Symmetric(material.clone())), 3600)
            .await
            .unwrap();
        let (meta, plaintext) = store.download(&info.id).await.unwrap();
        assert_eq!(meta.id, info.id);
        assert_eq!(plaintext.as_ref(), material.as_slice());
    }

    #[tokio::test]
    async fn register_asymmetric_generates_ed25519_keypair() {
        let store = store();
        let info = store.register(KeyKind::Asymmetric, None, 3600).await.unwrap();
        assert!(info.public.is_some());
    }

    #[tokio::test]
    async fn list_never_exposes_encrypted_private_field() {
        let store = store();
        store.register(KeyKind::Symmetric, None, 3600).await.unwrap();
        let infos = store.list().await.unwrap();
        assert_eq!(infos.len(), 1);
    }
}
