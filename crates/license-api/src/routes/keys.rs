//! KMS key lifecycle: register, list, download, validate, refresh, revoke.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use license_core::KeyId;
use license_keystore::{KeyInfo, KeyMaterial};
use license_storage::models::{KeyKind, KeyStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/keys", post(register).get(list))
        .route("/keys/:id/download", get(download))
        .route("/keys/validate", post(validate_key))
        .route("/keys/:id/refresh", post(refresh))
        .route("/keys/:id", axum::routing::delete(revoke))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    kind: KeyKind,
    /// Base64-std caller-supplied material. Omitted to generate fresh
    /// material instead.
    material: Option<String>,
    ttl_seconds: i64,
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    ttl_seconds: i64,
}

#[derive(Debug, Deserialize)]
struct ValidateKeyRequest {
    key_id: String,
    material: String,
}

#[derive(Debug, Serialize)]
struct KeyInfoResponse {
    id: String,
    kind: KeyKind,
    public: Option<String>,
    expires_at: String,
    status: KeyStatus,
    version: u64,
}

impl From<KeyInfo> for KeyInfoResponse {
    fn from(info: KeyInfo) -> Self {
        Self {
            id: info.id.to_string(),
            kind: info.kind,
            public: info.public,
            expires_at: info.expires_at.to_canonical_string(),
            status: info.status,
            version: info.version,
        }
    }
}

#[derive(Debug, Serialize)]
struct DownloadResponse {
    #[serde(flatten)]
    info: KeyInfoResponse,
    material: String,
}

#[derive(Debug, Serialize)]
struct ValidateKeyResponse {
    valid: bool,
    revoked: bool,
}

fn parse_id(raw: &str) -> Result<KeyId, AppError> {
    let uuid: Uuid = raw.parse().map_err(|_| AppError::BadRequest(format!("{raw} is not a valid key id")))?;
    Ok(KeyId::from_uuid(uuid))
}

fn decode_material(field_name: &'static str, value: &str) -> Result<Vec<u8>, AppError> {
    base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| AppError::BadRequest(format!("{field_name} is not valid base64: {e}")))
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<KeyInfoResponse>, AppError> {
    let material = match (req.kind, req.material) {
        (KeyKind::Symmetric, Some(raw)) => Some(KeyMaterial::Symmetric(decode_material("material", &raw)?)),
        (KeyKind::Asymmetric, Some(raw)) => {
            let bytes = decode_material("material", &raw)?;
            let array: [u8; 64] = bytes
                .try_into()
                .map_err(|_| AppError::BadRequest("asymmetric material must decode to exactly 64 bytes".to_string()))?;
            Some(KeyMaterial::Asymmetric(array))
        }
        (_, None) => None,
    };
    let info = state.keystore.register(req.kind, material, req.ttl_seconds).await?;
    Ok(Json(info.into()))
}

async fn list(State(state): State<AppState>) -> Result<Json<Vec<KeyInfoResponse>>, AppError> {
    let keys = state.keystore.list().await?;
    Ok(Json(keys.into_iter().map(KeyInfoResponse::from).collect()))
}

async fn download(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<DownloadResponse>, AppError> {
    let id = parse_id(&id)?;
    let (info, plaintext) = state.keystore.download(&id).await?;
    let material = base64::engine::general_purpose::STANDARD.encode(plaintext.as_ref());
    Ok(Json(DownloadResponse {
        info: info.into(),
        material,
    }))
}

async fn validate_key(
    State(state): State<AppState>,
    Json(req): Json<ValidateKeyRequest>,
) -> Result<Json<ValidateKeyResponse>, AppError> {
    let id = parse_id(&req.key_id)?;
    let presented = decode_material("material", &req.material)?;
    let outcome = state.keystore.validate(&id, &presented).await?;
    Ok(Json(ValidateKeyResponse {
        valid: outcome.valid,
        revoked: outcome.revoked,
    }))
}

async fn refresh(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<KeyInfoResponse>, AppError> {
    let id = parse_id(&id)?;
    let info = state.keystore.refresh_expiry(&id, req.ttl_seconds).await?;
    Ok(Json(info.into()))
}

async fn revoke(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<KeyInfoResponse>, AppError> {
    let id = parse_id(&id)?;
    let info = state.keystore.revoke(&id).await?;
    Ok(Json(info.into()))
}
