//! Customer Master License upload, lookup, and refresh.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use license_core::OrgId;
use license_storage::models::Cml;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cml/upload", post(upload))
        .route("/cml", get(get_cml))
        .route("/cml/refresh", post(refresh))
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    /// Base64-std encoding of the canonical CML document bytes. The
    /// target organization is read out of the decoded document's
    /// `org_id` field, not passed as a separate request field — a
    /// caller cannot upload a CML against an org it does not name
    /// inside the signed payload itself.
    cml_data: String,
    signature: String,
    public_key: String,
}

#[derive(Debug, Deserialize)]
struct OrgIdPeek {
    org_id: String,
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    cml_data: String,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct OrgIdQuery {
    org_id: String,
}

#[derive(Debug, Serialize)]
struct CmlResponse {
    org_id: String,
    max_sites: u32,
    validity: String,
    feature_packs: Vec<String>,
    created_at: String,
    updated_at: String,
}

impl From<Cml> for CmlResponse {
    fn from(cml: Cml) -> Self {
        Self {
            org_id: cml.org_id.as_str().to_string(),
            max_sites: cml.max_sites,
            validity: cml.validity.to_canonical_string(),
            feature_packs: cml.feature_packs,
            created_at: cml.created_at.to_canonical_string(),
            updated_at: cml.updated_at.to_canonical_string(),
        }
    }
}

fn decode_payload(cml_data: &str) -> Result<Vec<u8>, AppError> {
    base64::engine::general_purpose::STANDARD
        .decode(cml_data.trim())
        .map_err(|e| AppError::BadRequest(format!("cml_data is not valid base64: {e}")))
}

fn peek_org_id(payload: &[u8]) -> Result<OrgId, AppError> {
    let peek: OrgIdPeek = serde_json::from_slice(payload)
        .map_err(|e| AppError::BadRequest(format!("cml_data does not contain an org_id field: {e}")))?;
    Ok(OrgId::new(peek.org_id))
}

async fn upload(State(state): State<AppState>, Json(req): Json<UploadRequest>) -> Result<Json<CmlResponse>, AppError> {
    let payload = decode_payload(&req.cml_data)?;
    let org_id = peek_org_id(&payload)?;
    let cml = state
        .cmls
        .upload(&org_id, payload, &req.signature, &req.public_key)
        .await?;
    Ok(Json(cml.into()))
}

async fn get_cml(State(state): State<AppState>, Query(q): Query<OrgIdQuery>) -> Result<Json<CmlResponse>, AppError> {
    let org_id = OrgId::new(q.org_id);
    let cml = state.cmls.get(&org_id).await?;
    Ok(Json(cml.into()))
}

async fn refresh(
    State(state): State<AppState>,
    Query(q): Query<OrgIdQuery>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<CmlResponse>, AppError> {
    let org_id = OrgId::new(q.org_id);
    let payload = decode_payload(&req.cml_data)?;
    let cml = state.cmls.refresh(&org_id, payload, &req.signature).await?;
    Ok(Json(cml.into()))
}
