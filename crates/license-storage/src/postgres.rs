//! Postgres backend: `sqlx` runtime queries (`query`/`query_as` over
//! `&PgPool`, not the compile-time `query!` macro) so this crate builds
//! without a live database: plain SQL strings, explicit `.bind(...)`
//! calls, manual row extraction via `sqlx::Row`.
//!
//! Every repository method maps `sqlx::Error::RowNotFound` to
//! [`StorageError::NotFound`] and a unique-violation `DatabaseError`
//! to [`StorageError::Conflict`] (via [`StorageError::from`]).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use license_core::{
    CmlId, KeyId, ManifestId, OrgId, OrgKeyId, SiteId, SiteLicenseId, Timestamp, UsageEntryId,
};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{
    Cml, KeyKind, KeyStatus, KeyType, KmsKey, LedgerEntryType, OrgKey, Organization, SiteLicense,
    SiteStatus, UsageLedgerEntry, UsageManifest,
};
use crate::repository::{
    CmlRepository, KeyStoreRepository, OrgKeyRepository, OrganizationRepository,
    SiteLicenseRepository, UsageLedgerRepository, UsageManifestRepository,
};

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn map_insert_err(err: sqlx::Error, conflict_msg: impl FnOnce() -> String) -> StorageError {
    if is_unique_violation(&err) {
        StorageError::Conflict(conflict_msg())
    } else {
        StorageError::from(err)
    }
}

fn key_type_str(kt: KeyType) -> &'static str {
    match kt {
        KeyType::Dev => "dev",
        KeyType::Prod => "prod",
    }
}

fn parse_key_type(s: &str) -> Result<KeyType, StorageError> {
    match s {
        "dev" => Ok(KeyType::Dev),
        "prod" => Ok(KeyType::Prod),
        other => Err(StorageError::Backend(format!("unknown key_type {other}"))),
    }
}

fn site_status_str(s: SiteStatus) -> &'static str {
    match s {
        SiteStatus::Active => "active",
        SiteStatus::Revoked => "revoked",
    }
}

fn parse_site_status(s: &str) -> Result<SiteStatus, StorageError> {
    match s {
        "active" => Ok(SiteStatus::Active),
        "revoked" => Ok(SiteStatus::Revoked),
        other => Err(StorageError::Backend(format!("unknown site status {other}"))),
    }
}

fn key_kind_str(k: KeyKind) -> &'static str {
    match k {
        KeyKind::Symmetric => "symmetric",
        KeyKind::Asymmetric => "asymmetric",
    }
}

fn parse_key_kind(s: &str) -> Result<KeyKind, StorageError> {
    match s {
        "symmetric" => Ok(KeyKind::Symmetric),
        "asymmetric" => Ok(KeyKind::Asymmetric),
        other => Err(StorageError::Backend(format!("unknown key kind {other}"))),
    }
}

fn key_status_str(s: KeyStatus) -> &'static str {
    match s {
        KeyStatus::Active => "active",
        KeyStatus::Revoked => "revoked",
    }
}

fn parse_key_status(s: &str) -> Result<KeyStatus, StorageError> {
    match s {
        "active" => Ok(KeyStatus::Active),
        "revoked" => Ok(KeyStatus::Revoked),
        other => Err(StorageError::Backend(format!("unknown key status {other}"))),
    }
}

fn entry_type_str(t: LedgerEntryType) -> &'static str {
    match t {
        LedgerEntryType::SiteIssued => "site_issued",
        LedgerEntryType::Heartbeat => "heartbeat",
        LedgerEntryType::Revoked => "revoked",
        LedgerEntryType::ManifestEmitted => "manifest_emitted",
    }
}

fn parse_entry_type(s: &str) -> Result<LedgerEntryType, StorageError> {
    match s {
        "site_issued" => Ok(LedgerEntryType::SiteIssued),
        "heartbeat" => Ok(LedgerEntryType::Heartbeat),
        "revoked" => Ok(LedgerEntryType::Revoked),
        "manifest_emitted" => Ok(LedgerEntryType::ManifestEmitted),
        other => Err(StorageError::Backend(format!("unknown ledger entry type {other}"))),
    }
}

fn ts(dt: DateTime<Utc>) -> Timestamp {
    Timestamp::from_datetime(dt)
}

/// Append one `usage_ledger` row within an already-open transaction, so
/// the caller's own write lands in the same commit.
async fn insert_ledger_entry_tx(
    tx: &mut Transaction<'_, Postgres>,
    entry: &UsageLedgerEntry,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO usage_ledger (id, org_id, entry_type, site_id, data, signature, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(entry.id.as_uuid())
    .bind(entry.org_id.as_str())
    .bind(entry_type_str(entry.entry_type))
    .bind(entry.site_id.as_ref().map(SiteId::as_str))
    .bind(&entry.data)
    .bind(&entry.signature)
    .bind(entry.created_at.as_datetime())
    .execute(&mut *tx)
    .await?;
    Ok(())
}

/// Postgres-backed `organizations` table.
pub struct PgOrganizationRepository {
    pool: PgPool,
}

impl PgOrganizationRepository {
    /// Wrap a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationRepository for PgOrganizationRepository {
    async fn create(&self, org: Organization) -> Result<Organization, StorageError> {
        sqlx::query(
            "INSERT INTO organizations (org_id, display_name, created_at) VALUES ($1, $2, $3)",
        )
        .bind(org.org_id.as_str())
        .bind(&org.display_name)
        .bind(org.created_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, || format!("organization {} already exists", org.org_id)))?;
        Ok(org)
    }

    async fn get(&self, org_id: &OrgId) -> Result<Organization, StorageError> {
        let row = sqlx::query("SELECT org_id, display_name, created_at FROM organizations WHERE org_id = $1")
            .bind(org_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(Organization {
            org_id: OrgId::new(row.try_get::<String, _>("org_id")?),
            display_name: row.try_get("display_name")?,
            created_at: ts(row.try_get("created_at")?),
        })
    }

    async fn exists(&self, org_id: &OrgId) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT 1 AS present FROM organizations WHERE org_id = $1")
            .bind(org_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

/// Postgres-backed `cml` table.
pub struct PgCmlRepository {
    pool: PgPool,
}

impl PgCmlRepository {
    /// Wrap a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn cml_from_row(row: &sqlx::postgres::PgRow) -> Result<Cml, StorageError> {
    let feature_packs: serde_json::Value = row.try_get("feature_packs")?;
    let feature_packs: Vec<String> =
        serde_json::from_value(feature_packs).map_err(|e| StorageError::Backend(e.to_string()))?;
    Ok(Cml {
        id: CmlId::from_uuid(row.try_get::<Uuid, _>("id")?),
        org_id: OrgId::new(row.try_get::<String, _>("org_id")?),
        max_sites: row.try_get::<i32, _>("max_sites")? as u32,
        validity: ts(row.try_get("validity")?),
        feature_packs,
        cml_payload: row.try_get::<Vec<u8>, _>("cml_payload")?,
        signature: row.try_get("signature")?,
        issuer_public_pem: row.try_get("issuer_public_pem")?,
        created_at: ts(row.try_get("created_at")?),
        updated_at: ts(row.try_get("updated_at")?),
    })
}

#[async_trait]
impl CmlRepository for PgCmlRepository {
    async fn insert(&self, cml: Cml) -> Result<Cml, StorageError> {
        sqlx::query(
            "INSERT INTO cml (id, org_id, max_sites, validity, feature_packs, cml_payload,
             signature, issuer_public_pem, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(cml.id.as_uuid())
        .bind(cml.org_id.as_str())
        .bind(cml.max_sites as i32)
        .bind(cml.validity.as_datetime())
        .bind(serde_json::to_value(&cml.feature_packs).map_err(|e| StorageError::Backend(e.to_string()))?)
        .bind(&cml.cml_payload)
        .bind(&cml.signature)
        .bind(&cml.issuer_public_pem)
        .bind(cml.created_at.as_datetime())
        .bind(cml.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_err(e, || format!("CML already on file for org {}", cml.org_id)))?;
        Ok(cml)
    }

    async fn get(&self, org_id: &OrgId) -> Result<Cml, StorageError> {
        let row = sqlx::query(
            "SELECT id, org_id, max_sites, validity, feature_packs, cml_payload, signature,
             issuer_public_pem, created_at, updated_at FROM cml WHERE org_id = $1",
        )
        .bind(org_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        cml_from_row(&row)
    }

    async fn replace(&self, cml: Cml) -> Result<Cml, StorageError> {
        let result = sqlx::query(
            "UPDATE cml SET max_sites = $2, validity = $3, feature_packs = $4, cml_payload = $5,
             signature = $6, issuer_public_pem = $7, updated_at = $8 WHERE org_id = $1",
        )
        .bind(cml.org_id.as_str())
        .bind(cml.max_sites as i32)
        .bind(cml.validity.as_datetime())
        .bind(serde_json::to_value(&cml.feature_packs).map_err(|e| StorageError::Backend(e.to_string()))?)
        .bind(&cml.cml_payload)
        .bind(&cml.signature)
        .bind(&cml.issuer_public_pem)
        .bind(cml.updated_at.as_datetime())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("CML for org {}", cml.org_id)));
        }
        Ok(cml)
    }
}

/// Postgres-backed `org_keys` table.
pub struct PgOrgKeyRepository {
    pool: PgPool,
}

impl PgOrgKeyRepository {
    /// Wrap a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn org_key_from_row(row: &sqlx::postgres::PgRow) -> Result<OrgKey, StorageError> {
    Ok(OrgKey {
        id: OrgKeyId::from_uuid(row.try_get::<Uuid, _>("id")?),
        org_id: OrgId::new(row.try_get::<String, _>("org_id")?),
        key_type: parse_key_type(&row.try_get::<String, _>("key_type")?)?,
        private_enc: row.try_get("private_enc")?,
        public_pem: row.try_get("public_pem")?,
        created_at: ts(row.try_get("created_at")?),
    })
}

#[async_trait]
impl OrgKeyRepository for PgOrgKeyRepository {
    async fn insert(&self, key: OrgKey) -> Result<OrgKey, StorageError> {
        sqlx::query(
            "INSERT INTO org_keys (id, org_id, key_type, private_enc, public_pem, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(key.id.as_uuid())
        .bind(key.org_id.as_str())
        .bind(key_type_str(key.key_type))
        .bind(&key.private_enc)
        .bind(&key.public_pem)
        .bind(key.created_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_insert_err(e, || {
                format!("org key already exists for ({}, {:?})", key.org_id, key.key_type)
            })
        })?;
        Ok(key)
    }

    async fn get(&self, org_id: &OrgId, key_type: KeyType) -> Result<OrgKey, StorageError> {
        let row = sqlx::query(
            "SELECT id, org_id, key_type, private_enc, public_pem, created_at
             FROM org_keys WHERE org_id = $1 AND key_type = $2",
        )
        .bind(org_id.as_str())
        .bind(key_type_str(key_type))
        .fetch_one(&self.pool)
        .await?;
        org_key_from_row(&row)
    }

    async fn list_for_org(&self, org_id: &OrgId) -> Result<Vec<OrgKey>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, org_id, key_type, private_enc, public_pem, created_at
             FROM org_keys WHERE org_id = $1",
        )
        .bind(org_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(org_key_from_row).collect()
    }
}

/// Postgres-backed `site_licenses` table.
pub struct PgSiteLicenseRepository {
    pool: PgPool,
}

impl PgSiteLicenseRepository {
    /// Wrap a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn site_license_from_row(row: &sqlx::postgres::PgRow) -> Result<SiteLicense, StorageError> {
    let fingerprint: serde_json::Value = row.try_get("fingerprint")?;
    let fingerprint: BTreeMap<String, String> =
        serde_json::from_value(fingerprint).map_err(|e| StorageError::Backend(e.to_string()))?;
    Ok(SiteLicense {
        id: SiteLicenseId::from_uuid(row.try_get::<Uuid, _>("id")?),
        site_id: SiteId::new(row.try_get::<String, _>("site_id")?),
        org_id: OrgId::new(row.try_get::<String, _>("org_id")?),
        fingerprint,
        license_payload: row.try_get::<Vec<u8>, _>("license_payload")?,
        signature: row.try_get("signature")?,
        issued_at: ts(row.try_get("issued_at")?),
        expires_at: ts(row.try_get("expires_at")?),
        last_seen: ts(row.try_get("last_seen")?),
        status: parse_site_status(&row.try_get::<String, _>("status")?)?,
        key_type: parse_key_type(&row.try_get::<String, _>("key_type")?)?,
    })
}

const SITE_LICENSE_COLUMNS: &str = "id, site_id, org_id, fingerprint, license_payload, signature, \
     issued_at, expires_at, last_seen, status, key_type";

#[async_trait]
impl SiteLicenseRepository for PgSiteLicenseRepository {
    async fn insert(&self, site: SiteLicense) -> Result<SiteLicense, StorageError> {
        sqlx::query(
            "INSERT INTO site_licenses (id, site_id, org_id, fingerprint, license_payload,
             signature, issued_at, expires_at, last_seen, status, key_type)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(site.id.as_uuid())
        .bind(site.site_id.as_str())
        .bind(site.org_id.as_str())
        .bind(serde_json::to_value(&site.fingerprint).map_err(|e| StorageError::Backend(e.to_string()))?)
        .bind(&site.license_payload)
        .bind(&site.signature)
        .bind(site.issued_at.as_datetime())
        .bind(site.expires_at.as_datetime())
        .bind(site.last_seen.as_datetime())
        .bind(site_status_str(site.status))
        .bind(key_type_str(site.key_type))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_insert_err(e, || format!("site {} already exists for org {}", site.site_id, site.org_id))
        })?;
        Ok(site)
    }

    async fn get(&self, id: &SiteLicenseId) -> Result<SiteLicense, StorageError> {
        let query = format!("SELECT {SITE_LICENSE_COLUMNS} FROM site_licenses WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_one(&self.pool)
            .await?;
        site_license_from_row(&row)
    }

    async fn get_by_site_id(
        &self,
        org_id: &OrgId,
        site_id: &SiteId,
    ) -> Result<SiteLicense, StorageError> {
        let query =
            format!("SELECT {SITE_LICENSE_COLUMNS} FROM site_licenses WHERE org_id = $1 AND site_id = $2");
        let row = sqlx::query(&query)
            .bind(org_id.as_str())
            .bind(site_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        site_license_from_row(&row)
    }

    async fn count_active(&self, org_id: &OrgId) -> Result<u32, StorageError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM site_licenses WHERE org_id = $1 AND status = 'active'",
        )
        .bind(org_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("n")? as u32)
    }

    async fn list_active(&self, org_id: &OrgId) -> Result<Vec<SiteLicense>, StorageError> {
        let query =
            format!("SELECT {SITE_LICENSE_COLUMNS} FROM site_licenses WHERE org_id = $1 AND status = 'active'");
        let rows = sqlx::query(&query)
            .bind(org_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(site_license_from_row).collect()
    }

    async fn list(
        &self,
        org_id: &OrgId,
        status: Option<SiteStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<SiteLicense>, u64), StorageError> {
        let status_str = status.map(site_status_str);
        let rows = match status_str {
            Some(s) => {
                let query = format!(
                    "SELECT {SITE_LICENSE_COLUMNS} FROM site_licenses WHERE org_id = $1 AND status = $2
                     ORDER BY issued_at DESC LIMIT $3 OFFSET $4"
                );
                sqlx::query(&query)
                    .bind(org_id.as_str())
                    .bind(s)
                    .bind(limit as i64)
                    .bind(offset as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let query = format!(
                    "SELECT {SITE_LICENSE_COLUMNS} FROM site_licenses WHERE org_id = $1
                     ORDER BY issued_at DESC LIMIT $2 OFFSET $3"
                );
                sqlx::query(&query)
                    .bind(org_id.as_str())
                    .bind(limit as i64)
                    .bind(offset as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        let page = rows.iter().map(site_license_from_row).collect::<Result<Vec<_>, _>>()?;

        let total_row = match status_str {
            Some(s) => {
                sqlx::query("SELECT COUNT(*) AS n FROM site_licenses WHERE org_id = $1 AND status = $2")
                    .bind(org_id.as_str())
                    .bind(s)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT COUNT(*) AS n FROM site_licenses WHERE org_id = $1")
                    .bind(org_id.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        let total = total_row.try_get::<i64, _>("n")? as u64;
        Ok((page, total))
    }

    async fn touch_heartbeat(
        &self,
        id: &SiteLicenseId,
        now: Timestamp,
    ) -> Result<SiteLicense, StorageError> {
        let result = sqlx::query("UPDATE site_licenses SET last_seen = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(now.as_datetime())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("site license {id}")));
        }
        self.get(id).await
    }

    async fn revoke(&self, id: &SiteLicenseId) -> Result<SiteLicense, StorageError> {
        let result = sqlx::query("UPDATE site_licenses SET status = 'revoked' WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("site license {id}")));
        }
        self.get(id).await
    }

    async fn insert_with_ledger_entry(
        &self,
        site: SiteLicense,
        entry: UsageLedgerEntry,
    ) -> Result<(SiteLicense, UsageLedgerEntry), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO site_licenses (id, site_id, org_id, fingerprint, license_payload,
             signature, issued_at, expires_at, last_seen, status, key_type)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(site.id.as_uuid())
        .bind(site.site_id.as_str())
        .bind(site.org_id.as_str())
        .bind(serde_json::to_value(&site.fingerprint).map_err(|e| StorageError::Backend(e.to_string()))?)
        .bind(&site.license_payload)
        .bind(&site.signature)
        .bind(site.issued_at.as_datetime())
        .bind(site.expires_at.as_datetime())
        .bind(site.last_seen.as_datetime())
        .bind(site_status_str(site.status))
        .bind(key_type_str(site.key_type))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            map_insert_err(e, || format!("site {} already exists for org {}", site.site_id, site.org_id))
        })?;
        insert_ledger_entry_tx(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok((site, entry))
    }

    async fn touch_heartbeat_with_ledger_entry(
        &self,
        id: &SiteLicenseId,
        now: Timestamp,
        entry: UsageLedgerEntry,
    ) -> Result<(SiteLicense, UsageLedgerEntry), StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE site_licenses SET last_seen = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(now.as_datetime())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("site license {id}")));
        }
        let query = format!("SELECT {SITE_LICENSE_COLUMNS} FROM site_licenses WHERE id = $1");
        let row = sqlx::query(&query).bind(id.as_uuid()).fetch_one(&mut *tx).await?;
        let updated = site_license_from_row(&row)?;
        insert_ledger_entry_tx(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok((updated, entry))
    }

    async fn revoke_with_ledger_entry(
        &self,
        id: &SiteLicenseId,
        entry: UsageLedgerEntry,
    ) -> Result<(SiteLicense, UsageLedgerEntry), StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE site_licenses SET status = 'revoked' WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("site license {id}")));
        }
        let query = format!("SELECT {SITE_LICENSE_COLUMNS} FROM site_licenses WHERE id = $1");
        let row = sqlx::query(&query).bind(id.as_uuid()).fetch_one(&mut *tx).await?;
        let updated = site_license_from_row(&row)?;
        insert_ledger_entry_tx(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok((updated, entry))
    }
}

/// Postgres-backed `usage_manifests` table.
pub struct PgUsageManifestRepository {
    pool: PgPool,
}

impl PgUsageManifestRepository {
    /// Wrap a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn manifest_from_row(row: &sqlx::postgres::PgRow) -> Result<UsageManifest, StorageError> {
    Ok(UsageManifest {
        id: ManifestId::from_uuid(row.try_get::<Uuid, _>("id")?),
        org_id: OrgId::new(row.try_get::<String, _>("org_id")?),
        period: row.try_get("period")?,
        manifest_payload: row.try_get::<Vec<u8>, _>("manifest_payload")?,
        signature: row.try_get("signature")?,
        sent_to_root: row.try_get("sent_to_root")?,
        sent_at: row.try_get::<Option<DateTime<Utc>>, _>("sent_at")?.map(ts),
        created_at: ts(row.try_get("created_at")?),
    })
}

const MANIFEST_COLUMNS: &str =
    "id, org_id, period, manifest_payload, signature, sent_to_root, sent_at, created_at";

#[async_trait]
impl UsageManifestRepository for PgUsageManifestRepository {
    async fn insert(&self, manifest: UsageManifest) -> Result<UsageManifest, StorageError> {
        sqlx::query(
            "INSERT INTO usage_manifests (id, org_id, period, manifest_payload, signature,
             sent_to_root, sent_at, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(manifest.id.as_uuid())
        .bind(manifest.org_id.as_str())
        .bind(&manifest.period)
        .bind(&manifest.manifest_payload)
        .bind(&manifest.signature)
        .bind(manifest.sent_to_root)
        .bind(manifest.sent_at.as_ref().map(Timestamp::as_datetime))
        .bind(manifest.created_at.as_datetime())
        .execute(&self.pool)
        .await?;
        Ok(manifest)
    }

    async fn get(&self, id: &ManifestId) -> Result<UsageManifest, StorageError> {
        let query = format!("SELECT {MANIFEST_COLUMNS} FROM usage_manifests WHERE id = $1");
        let row = sqlx::query(&query).bind(id.as_uuid()).fetch_one(&self.pool).await?;
        manifest_from_row(&row)
    }

    async fn mark_sent(
        &self,
        id: &ManifestId,
        sent_at: Timestamp,
    ) -> Result<UsageManifest, StorageError> {
        let result = sqlx::query(
            "UPDATE usage_manifests SET sent_to_root = true, sent_at = $2 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(sent_at.as_datetime())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("usage manifest {id}")));
        }
        self.get(id).await
    }

    async fn mark_sent_with_ledger_entry(
        &self,
        id: &ManifestId,
        sent_at: Timestamp,
        entry: UsageLedgerEntry,
    ) -> Result<(UsageManifest, UsageLedgerEntry), StorageError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE usage_manifests SET sent_to_root = true, sent_at = $2 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(sent_at.as_datetime())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("usage manifest {id}")));
        }
        let query = format!("SELECT {MANIFEST_COLUMNS} FROM usage_manifests WHERE id = $1");
        let row = sqlx::query(&query).bind(id.as_uuid()).fetch_one(&mut *tx).await?;
        let updated = manifest_from_row(&row)?;
        insert_ledger_entry_tx(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok((updated, entry))
    }
}

/// Postgres-backed `usage_ledger` table.
pub struct PgUsageLedgerRepository {
    pool: PgPool,
}

impl PgUsageLedgerRepository {
    /// Wrap a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn ledger_entry_from_row(row: &sqlx::postgres::PgRow) -> Result<UsageLedgerEntry, StorageError> {
    Ok(UsageLedgerEntry {
        id: UsageEntryId::from_uuid(row.try_get::<Uuid, _>("id")?),
        org_id: OrgId::new(row.try_get::<String, _>("org_id")?),
        entry_type: parse_entry_type(&row.try_get::<String, _>("entry_type")?)?,
        site_id: row.try_get::<Option<String>, _>("site_id")?.map(SiteId::new),
        data: row.try_get("data")?,
        signature: row.try_get("signature")?,
        created_at: ts(row.try_get("created_at")?),
    })
}

#[async_trait]
impl UsageLedgerRepository for PgUsageLedgerRepository {
    async fn append(&self, entry: UsageLedgerEntry) -> Result<UsageLedgerEntry, StorageError> {
        sqlx::query(
            "INSERT INTO usage_ledger (id, org_id, entry_type, site_id, data, signature, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.org_id.as_str())
        .bind(entry_type_str(entry.entry_type))
        .bind(entry.site_id.as_ref().map(SiteId::as_str))
        .bind(&entry.data)
        .bind(&entry.signature)
        .bind(entry.created_at.as_datetime())
        .execute(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn read(
        &self,
        org_id: &OrgId,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<UsageLedgerEntry>, u64), StorageError> {
        let rows = sqlx::query(
            "SELECT id, org_id, entry_type, site_id, data, signature, created_at
             FROM usage_ledger WHERE org_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(org_id.as_str())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        let page = rows.iter().map(ledger_entry_from_row).collect::<Result<Vec<_>, _>>()?;

        let total_row = sqlx::query("SELECT COUNT(*) AS n FROM usage_ledger WHERE org_id = $1")
            .bind(org_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        let total = total_row.try_get::<i64, _>("n")? as u64;
        Ok((page, total))
    }
}

/// Postgres-backed `kms_keys` table.
pub struct PgKeyStoreRepository {
    pool: PgPool,
}

impl PgKeyStoreRepository {
    /// Wrap a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn kms_key_from_row(row: &sqlx::postgres::PgRow) -> Result<KmsKey, StorageError> {
    Ok(KmsKey {
        id: KeyId::from_uuid(row.try_get::<Uuid, _>("id")?),
        kind: parse_key_kind(&row.try_get::<String, _>("kind")?)?,
        public: row.try_get("public")?,
        encrypted_private: row.try_get("encrypted_private")?,
        expires_at: ts(row.try_get("expires_at")?),
        created_at: ts(row.try_get("created_at")?),
        status: parse_key_status(&row.try_get::<String, _>("status")?)?,
        version: row.try_get::<i64, _>("version")? as u64,
    })
}

const KMS_KEY_COLUMNS: &str = "id, kind, public, encrypted_private, expires_at, created_at, status, version";

#[async_trait]
impl KeyStoreRepository for PgKeyStoreRepository {
    async fn insert(&self, key: KmsKey) -> Result<KmsKey, StorageError> {
        sqlx::query(
            "INSERT INTO kms_keys (id, kind, public, encrypted_private, expires_at, created_at,
             status, version) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(key.id.as_uuid())
        .bind(key_kind_str(key.kind))
        .bind(&key.public)
        .bind(&key.encrypted_private)
        .bind(key.expires_at.as_datetime())
        .bind(key.created_at.as_datetime())
        .bind(key_status_str(key.status))
        .bind(key.version as i64)
        .execute(&self.pool)
        .await?;
        Ok(key)
    }

    async fn get(&self, id: &KeyId) -> Result<KmsKey, StorageError> {
        let query = format!("SELECT {KMS_KEY_COLUMNS} FROM kms_keys WHERE id = $1");
        let row = sqlx::query(&query).bind(id.as_uuid()).fetch_one(&self.pool).await?;
        kms_key_from_row(&row)
    }

    async fn list(&self) -> Result<Vec<KmsKey>, StorageError> {
        let query = format!("SELECT {KMS_KEY_COLUMNS} FROM kms_keys");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(kms_key_from_row).collect()
    }

    async fn replace_cas(
        &self,
        key: KmsKey,
        expected_version: u64,
    ) -> Result<KmsKey, StorageError> {
        let result = sqlx::query(
            "UPDATE kms_keys SET encrypted_private = $3, expires_at = $4, status = $5, version = $6
             WHERE id = $1 AND version = $2",
        )
        .bind(key.id.as_uuid())
        .bind(expected_version as i64)
        .bind(&key.encrypted_private)
        .bind(key.expires_at.as_datetime())
        .bind(key_status_str(key.status))
        .bind(key.version as i64)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            // Distinguish "no such row" from "row exists but version moved on".
            let current = self.get(&key.id).await?;
            if current.version != expected_version {
                return Err(StorageError::VersionConflict {
                    id: key.id.to_string(),
                    expected: expected_version,
                    actual: current.version,
                });
            }
            return Err(StorageError::NotFound(format!("KMS key {}", key.id)));
        }
        Ok(key)
    }
}

/// Run the embedded migrations against `pool`. Idempotent — safe to call
/// on every startup.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))
}
