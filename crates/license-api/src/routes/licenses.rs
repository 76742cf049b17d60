//! Self-contained license file generation and validation.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine;
use license_core::{KeyId, Timestamp};
use license_file::{FileInvalidReason, FileValidationOutcome, LicenseFile};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/licenses/generate", post(generate))
        .route("/licenses/validate", post(validate_file))
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    key_id: String,
    license_type: String,
    expires_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    license_file: String,
}

#[derive(Debug, Deserialize)]
struct ValidateFileRequest {
    license_file: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "result")]
enum ValidateFileResponse {
    #[serde(rename = "valid")]
    Valid { license: LicenseFileView },
    #[serde(rename = "invalid")]
    Invalid {
        reason: String,
        license: Option<LicenseFileView>,
    },
}

#[derive(Debug, Serialize)]
struct LicenseFileView {
    license_id: String,
    license_type: String,
    key_id: String,
    issued_at: String,
    expires_at: String,
    metadata: BTreeMap<String, String>,
}

impl From<LicenseFile> for LicenseFileView {
    fn from(file: LicenseFile) -> Self {
        Self {
            license_id: file.license_id.to_string(),
            license_type: file.license_type,
            key_id: file.key_id.to_string(),
            issued_at: file.issued_at.to_canonical_string(),
            expires_at: file.expires_at.to_canonical_string(),
            metadata: file.metadata,
        }
    }
}

fn reason_code(reason: &FileInvalidReason) -> String {
    match reason {
        FileInvalidReason::Malformed(detail) => format!("malformed: {detail}"),
        FileInvalidReason::MissingSignature => "missing_signature".to_string(),
        FileInvalidReason::BadSignature => "bad_signature".to_string(),
        FileInvalidReason::Expired => "expired".to_string(),
        FileInvalidReason::UnknownKey => "unknown_key".to_string(),
        FileInvalidReason::Revoked => "revoked".to_string(),
    }
}

async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    let uuid: Uuid = req
        .key_id
        .parse()
        .map_err(|_| AppError::BadRequest(format!("{} is not a valid key id", req.key_id)))?;
    let key_id = KeyId::from_uuid(uuid);
    let bytes = state
        .files
        .generate(
            &key_id,
            req.license_type,
            Timestamp::from_datetime(req.expires_at),
            req.metadata,
            &state.master_key,
        )
        .await?;
    Ok(Json(GenerateResponse {
        license_file: base64::engine::general_purpose::STANDARD.encode(bytes),
    }))
}

async fn validate_file(
    State(state): State<AppState>,
    Json(req): Json<ValidateFileRequest>,
) -> Result<Json<ValidateFileResponse>, AppError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(req.license_file.trim())
        .map_err(|e| AppError::BadRequest(format!("license_file is not valid base64: {e}")))?;

    let outcome = state.files.validate(&bytes, &state.master_key).await;
    let response = match outcome {
        FileValidationOutcome::Valid(file) => ValidateFileResponse::Valid { license: file.into() },
        FileValidationOutcome::Invalid { reason, parsed } => ValidateFileResponse::Invalid {
            reason: reason_code(&reason),
            license: parsed.map(LicenseFileView::from),
        },
    };
    Ok(Json(response))
}
