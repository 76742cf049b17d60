//! Per-organization ECDSA-P256 signing key vault.
//!
//! On create: generate a P-256 keypair, encode the private half as a
//! PKCS#8 PEM block, draw a fresh 32-byte salt and 12-byte nonce, derive
//! an AES-256-GCM key from `ENCRYPTION_PASSWORD` via PBKDF2 (100,000
//! iterations), and store `base64(salt || nonce || ct_and_tag)`. Both the
//! plaintext PEM and the derived key are zeroed once sealing completes.
//!
//! On sign: reverse the format, decrypt, load the private key, sign, and
//! let the plaintext key drop (and zero) at the end of the call. A single
//! vault instance serializes decrypt+sign within the same call — the
//! plaintext private key is never logged or written to the ledger.
//!
//! Uniqueness on `(org_id, key_type)` is enforced by the storage layer;
//! a duplicate create surfaces as [`CoreError::Conflict`].

use std::sync::Arc;

use license_core::{CoreError, OrgId, Timestamp};
use license_crypto::ecdsa::{EcdsaSignature, OrgSigningKey, OrgVerifyingKey};
use license_crypto::kdf::{pbkdf2, validate_password, DERIVED_KEY_LEN};
use license_storage::models::{KeyType, OrgKey};
use license_storage::OrgKeyRepository;
use rand_core::RngCore;
use zeroize::Zeroizing;

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const ITERATIONS: u32 = 100_000;

/// Per-organization signing key vault.
pub struct OrgKeyVault {
    repo: Arc<dyn OrgKeyRepository>,
    password: String,
}

impl OrgKeyVault {
    /// Construct a vault. Rejects `password` shorter than 16 bytes.
    pub fn new(repo: Arc<dyn OrgKeyRepository>, password: impl Into<String>) -> Result<Self, CoreError> {
        let password = password.into();
        validate_password(&password).map_err(CoreError::from)?;
        Ok(Self { repo, password })
    }

    /// Generate and persist a fresh signing key for `(org_id, key_type)`.
    /// `Conflict` if one already exists.
    pub async fn create(&self, org_id: &OrgId, key_type: KeyType) -> Result<OrgVerifyingKey, CoreError> {
        let (signing, verifying) = license_crypto::ecdsa::generate_signing_keypair();
        let plaintext_pem = Zeroizing::new(signing.to_pkcs8_pem().map_err(CoreError::from)?);

        let mut salt = [0u8; SALT_LEN];
        rand_core::OsRng.fill_bytes(&mut salt);
        let derived = pbkdf2(&self.password, &salt, ITERATIONS);
        debug_assert_eq!(derived.as_bytes().len(), DERIVED_KEY_LEN);

        let sealed_inner =
            license_crypto::aead::seal(derived.as_bytes(), plaintext_pem.as_bytes())
                .map_err(CoreError::from)?;

        let mut envelope = Vec::with_capacity(SALT_LEN + sealed_inner.len());
        envelope.extend_from_slice(&salt);
        envelope.extend_from_slice(&sealed_inner);
        let private_enc =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, envelope);

        let public_pem = verifying.to_spki_pem().map_err(CoreError::from)?;

        let row = OrgKey {
            id: license_core::OrgKeyId::new(),
            org_id: org_id.clone(),
            key_type,
            private_enc,
            public_pem,
            created_at: Timestamp::now(),
        };
        self.repo.insert(row).await.map_err(CoreError::from)?;
        Ok(verifying)
    }

    /// Sign canonicalized data with the org's `key_type` key. Decrypts,
    /// signs, and lets the plaintext key zero on drop before returning.
    pub async fn sign(
        &self,
        org_id: &OrgId,
        key_type: KeyType,
        data: &license_core::CanonicalBytes,
    ) -> Result<EcdsaSignature, CoreError> {
        let row = self.repo.get(org_id, key_type).await.map_err(CoreError::from)?;
        let signing_key = self.decrypt_private(&row)?;
        Ok(signing_key.sign(data))
    }

    /// Look up the public half for `(org_id, key_type)` without touching
    /// the encrypted private material.
    pub async fn public_key(
        &self,
        org_id: &OrgId,
        key_type: KeyType,
    ) -> Result<OrgVerifyingKey, CoreError> {
        let row = self.repo.get(org_id, key_type).await.map_err(CoreError::from)?;
        OrgVerifyingKey::from_spki_pem(&row.public_pem).map_err(CoreError::from)
    }

    fn decrypt_private(&self, row: &OrgKey) -> Result<OrgSigningKey, CoreError> {
        let envelope = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            &row.private_enc,
        )
        .map_err(|e| CoreError::Malformed(format!("private_enc is not valid base64: {e}")))?;
        if envelope.len() < SALT_LEN + NONCE_LEN {
            return Err(CoreError::Malformed(
                "private_enc envelope too short to contain salt + nonce".to_string(),
            ));
        }
        let (salt, sealed_inner) = envelope.split_at(SALT_LEN);
        let derived = pbkdf2(&self.password, salt, ITERATIONS);
        let plaintext_pem = Zeroizing::new(
            license_crypto::aead::open(derived.as_bytes(), sealed_inner).map_err(CoreError::from)?,
        );
        let pem = std::str::from_utf8(plaintext_pem.as_ref())
            .map_err(|e| CoreError::Malformed(format!("decrypted PEM is not valid UTF-8: {e}")))?;
        OrgSigningKey::from_pkcs8_pem(pem).map_err(CoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use license_core::CanonicalBytes;
    use license_storage::memory::MemoryOrgKeyRepository;
    use serde_json::json;

    fn vault() -> OrgKeyVault {
        OrgKeyVault::new(
            Arc::new(MemoryOrgKeyRepository::new()),
            "a sufficiently long password",
        )
        .unwrap()
    }

    #[test]
    fn short_password_rejected_at_construction() {
        let result = OrgKeyVault::new(Arc::new(MemoryOrgKeyRepository::new()), "short");
        assert!(matches!(result, Err(CoreError::Crypto(_))));
    }

    #[tokio::test]
    async fn create_then_sign_then_verify_roundtrip() {
        let vault = vault();
        let org_id = OrgId::new("acme");
        let verifying = vault.create(&org_id, KeyType::Prod).await.unwrap();

        let data = CanonicalBytes::new(&json!({"site_id": "s1"})).unwrap();
        let sig = vault.sign(&org_id, KeyType::Prod, &data).await.unwrap();
        assert!(verifying.verify(&data, &sig).is_ok());
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let vault = vault();
        let org_id = OrgId::new("acme");
        vault.create(&org_id, KeyType::Prod).await.unwrap();
        let result = vault.create(&org_id, KeyType::Prod).await;
        assert!(matches!(result, Err(CoreError::Storage(_)) | Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn dev_and_prod_keys_are_independent() {
        let vault = vault();
        let org_id = OrgId::new("acme");
        let dev_pub = vault.create(&org_id, KeyType::Dev).await.unwrap();
        let prod_pub = vault.create(&org_id, KeyType::Prod).await.unwrap();
        assert_ne!(dev_pub, prod_pub);
    }

    #[tokio::test]
    async fn public_key_lookup_matches_created_key() {
        let vault = vault();
        let org_id = OrgId::new("acme");
        let created = vault.create(&org_id, KeyType::Prod).await.unwrap();
        let looked_up = vault.public_key(&org_id, KeyType::Prod).await.unwrap();
        assert_eq!(created, looked_up);
    }
}
