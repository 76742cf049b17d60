//! Offline Site License chain validation.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine;
use license_core::Timestamp;
use license_validator::{validate, InvalidReason, ValidationOutcome, ValidationRequest};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/validate", post(validate_chain))
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    license_payload: String,
    site_signature: String,
    org_public_key: String,
    cml_payload: String,
    cml_signature: String,
    fingerprint: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "result")]
enum ValidateResponse {
    #[serde(rename = "valid")]
    Valid,
    #[serde(rename = "valid_with_grace")]
    ValidWithGrace,
    #[serde(rename = "invalid")]
    Invalid { reason: String },
    #[serde(rename = "warning")]
    Warning { warnings: Vec<String> },
}

impl From<ValidationOutcome> for ValidateResponse {
    fn from(outcome: ValidationOutcome) -> Self {
        match outcome {
            ValidationOutcome::Valid => Self::Valid,
            ValidationOutcome::ValidWithGrace => Self::ValidWithGrace,
            ValidationOutcome::Invalid(reason) => Self::Invalid {
                reason: reason_code(&reason),
            },
            ValidationOutcome::Warning(warnings) => Self::Warning { warnings },
        }
    }
}

fn reason_code(reason: &InvalidReason) -> String {
    match reason {
        InvalidReason::Malformed(detail) => format!("malformed: {detail}"),
        InvalidReason::SiteSignature => "site_signature".to_string(),
        InvalidReason::CmlSignature => "cml_signature".to_string(),
        InvalidReason::ChainMismatch => "chain_mismatch".to_string(),
        InvalidReason::Expired => "expired".to_string(),
    }
}

fn decode(field_name: &'static str, value: &str) -> Result<Vec<u8>, AppError> {
    base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| AppError::BadRequest(format!("{field_name} is not valid base64: {e}")))
}

async fn validate_chain(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>, AppError> {
    let request = ValidationRequest {
        license_payload_bytes: decode("license_payload", &req.license_payload)?,
        site_signature_b64: req.site_signature,
        org_public_pem: req.org_public_key,
        cml_payload_bytes: decode("cml_payload", &req.cml_payload)?,
        cml_signature_b64: req.cml_signature,
        root_public_pem: state.root_public_pem.clone(),
        presented_fingerprint: req.fingerprint,
        now: Timestamp::now(),
    };

    Ok(Json(validate(&request).into()))
}
