//! Site License issuance, lookup, heartbeat, and revocation.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::Engine;
use license_core::{SiteId, SiteLicenseId};
use license_storage::models::{KeyType, SiteLicense, SiteStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sites/create", post(create))
        .route("/sites", get(list))
        .route("/sites/:id", get(get_one))
        .route("/sites/:id", delete(revoke))
        .route("/sites/:id/heartbeat", post(heartbeat))
}

#[derive(Debug, Deserialize)]
struct CreateRequest {
    site_id: String,
    #[serde(default)]
    fingerprint: BTreeMap<String, String>,
    key_type: Option<KeyType>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<SiteStatus>,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Serialize)]
struct SiteResponse {
    id: String,
    site_id: String,
    org_id: String,
    fingerprint: BTreeMap<String, String>,
    license_payload: String,
    signature: String,
    issued_at: String,
    expires_at: String,
    last_seen: String,
    status: SiteStatus,
    key_type: KeyType,
}

impl From<SiteLicense> for SiteResponse {
    fn from(site: SiteLicense) -> Self {
        Self {
            id: site.id.to_string(),
            site_id: site.site_id.as_str().to_string(),
            org_id: site.org_id.as_str().to_string(),
            fingerprint: site.fingerprint,
            license_payload: base64::engine::general_purpose::STANDARD.encode(&site.license_payload),
            signature: site.signature,
            issued_at: site.issued_at.to_canonical_string(),
            expires_at: site.expires_at.to_canonical_string(),
            last_seen: site.last_seen.to_canonical_string(),
            status: site.status,
            key_type: site.key_type,
        }
    }
}

#[derive(Debug, Serialize)]
struct SitePage {
    sites: Vec<SiteResponse>,
    total: u64,
}

fn parse_id(raw: &str) -> Result<SiteLicenseId, AppError> {
    let uuid: Uuid = raw
        .parse()
        .map_err(|_| AppError::BadRequest(format!("{raw} is not a valid site license id")))?;
    Ok(SiteLicenseId::from_uuid(uuid))
}

async fn create(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(req): Json<CreateRequest>,
) -> Result<Json<SiteResponse>, AppError> {
    let site = state
        .issuer
        .issue(
            &caller.org_id,
            SiteId::new(req.site_id),
            req.fingerprint,
            req.key_type.unwrap_or(KeyType::Prod),
        )
        .await?;
    Ok(Json(site.into()))
}

async fn list(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(q): Query<ListQuery>,
) -> Result<Json<SitePage>, AppError> {
    let (sites, total) = state
        .sites_repo
        .list(&caller.org_id, q.status, q.limit, q.offset)
        .await
        .map_err(license_core::CoreError::from)?;
    Ok(Json(SitePage {
        sites: sites.into_iter().map(SiteResponse::from).collect(),
        total,
    }))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<SiteResponse>, AppError> {
    let id = parse_id(&id)?;
    let site = state.sites_repo.get(&id).await.map_err(license_core::CoreError::from)?;
    Ok(Json(site.into()))
}

async fn revoke(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<SiteResponse>, AppError> {
    let id = parse_id(&id)?;
    let site = state.issuer.revoke(&id).await?;
    Ok(Json(site.into()))
}

async fn heartbeat(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<SiteResponse>, AppError> {
    let id = parse_id(&id)?;
    let site = state.issuer.heartbeat(&id).await?;
    Ok(Json(site.into()))
}
