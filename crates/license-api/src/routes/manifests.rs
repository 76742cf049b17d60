//! Usage manifest generation and emission to the root authority.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine;
use license_core::ManifestId;
use license_storage::models::{KeyType, UsageManifest};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/manifests/generate", post(generate))
        .route("/manifests/send", post(send))
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    period: String,
    key_type: Option<KeyType>,
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    manifest_id: String,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct ManifestResponse {
    id: String,
    org_id: String,
    period: String,
    manifest_payload: String,
    signature: String,
    sent_to_root: bool,
    sent_at: Option<String>,
    created_at: String,
}

impl From<UsageManifest> for ManifestResponse {
    fn from(manifest: UsageManifest) -> Self {
        Self {
            id: manifest.id.to_string(),
            org_id: manifest.org_id.as_str().to_string(),
            period: manifest.period,
            manifest_payload: base64::engine::general_purpose::STANDARD.encode(&manifest.manifest_payload),
            signature: manifest.signature,
            sent_to_root: manifest.sent_to_root,
            sent_at: manifest.sent_at.map(|t| t.to_canonical_string()),
            created_at: manifest.created_at.to_canonical_string(),
        }
    }
}

async fn generate(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<ManifestResponse>, AppError> {
    let manifest = state
        .manifests
        .generate(&caller.org_id, req.period, req.key_type.unwrap_or(KeyType::Prod))
        .await?;
    Ok(Json(manifest.into()))
}

async fn send(
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<ManifestResponse>, AppError> {
    let uuid: Uuid = req
        .manifest_id
        .parse()
        .map_err(|_| AppError::BadRequest(format!("{} is not a valid manifest id", req.manifest_id)))?;
    let manifest = state.manifests.emit(&ManifestId::from_uuid(uuid), &req.endpoint).await?;
    Ok(Json(manifest.into()))
}
