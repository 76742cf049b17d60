//! Structured error type implementing `axum::response::IntoResponse`.
//!
//! Maps [`CoreError`] (and the handful of request-shape errors `CoreError`
//! has no variant for) to HTTP status codes and a JSON error body. Internal
//! error detail is logged but never returned for 5xx-class failures.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use license_core::CoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The single error this response carries.
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code, e.g. `"NOT_FOUND"`.
    pub code: String,
    /// Human-readable message. Redacted to a fixed string for 5xx errors.
    pub message: String,
}

/// Application-level error type returned by every route handler.
#[derive(Error, Debug)]
pub enum AppError {
    /// A core trust-plane operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The request body or query string could not be parsed into the
    /// shape a handler expects (distinct from [`CoreError::Malformed`],
    /// which covers payloads that parse as JSON but fail domain
    /// decoding — a base64 field that isn't base64, a missing query
    /// parameter, and the like).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The bearer token was missing, malformed, or did not verify.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Core(CoreError::Malformed(_)) => (StatusCode::BAD_REQUEST, "MALFORMED"),
            Self::Core(CoreError::InvalidSignature(_)) => (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE"),
            Self::Core(CoreError::ChainMismatch(_)) => (StatusCode::BAD_REQUEST, "CHAIN_MISMATCH"),
            Self::Core(CoreError::Expired { .. }) => (StatusCode::BAD_REQUEST, "EXPIRED"),
            Self::Core(CoreError::ExpiredWithGrace { .. }) => (StatusCode::BAD_REQUEST, "EXPIRED_WITH_GRACE"),
            Self::Core(CoreError::Revoked(_)) => (StatusCode::BAD_REQUEST, "REVOKED"),
            Self::Core(CoreError::MaxSitesExceeded { .. }) => (StatusCode::BAD_REQUEST, "MAX_SITES_EXCEEDED"),
            Self::Core(CoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Core(CoreError::CmlMissing(_)) => (StatusCode::NOT_FOUND, "CML_MISSING"),
            Self::Core(CoreError::Conflict(_)) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Core(CoreError::Crypto(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "CRYPTO_ERROR"),
            Self::Core(CoreError::Storage(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            Self::Core(CoreError::EmissionFailed(_)) => (StatusCode::BAD_GATEWAY, "EMISSION_FAILED"),
            Self::Core(CoreError::Config(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status.is_server_error() {
            "an internal error occurred".to_string()
        } else {
            self.to_string()
        };

        match &self {
            Self::Core(CoreError::Crypto(_)) => tracing::error!(error = %self, "cryptographic failure"),
            Self::Core(CoreError::Storage(_)) => tracing::error!(error = %self, "storage failure"),
            Self::Core(CoreError::Config(_)) => tracing::error!(error = %self, "configuration error"),
            Self::Core(CoreError::EmissionFailed(_)) => tracing::warn!(error = %self, "manifest emission failed"),
            Self::Core(CoreError::Conflict(_)) => tracing::warn!(error = %self, "conflict"),
            Self::Unauthorized(_) => tracing::info!(error = %self, "unauthorized request"),
            _ => {}
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn response_parts(err: AppError) -> (StatusCode, ErrorBody) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn not_found_maps_to_404() {
        let (status, body) = response_parts(AppError::Core(CoreError::NotFound("site".into()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error.code, "NOT_FOUND");
    }

    #[tokio::test]
    async fn cml_missing_maps_to_404() {
        let (status, body) = response_parts(AppError::Core(CoreError::CmlMissing("acme".into()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error.code, "CML_MISSING");
    }

    #[tokio::test]
    async fn invalid_signature_maps_to_400() {
        let (status, _) = response_parts(AppError::Core(CoreError::InvalidSignature("bad sig".into()))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn conflict_maps_to_409() {
        let (status, _) = response_parts(AppError::Core(CoreError::Conflict("dup".into()))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn storage_error_hides_detail() {
        let (status, body) =
            response_parts(AppError::Core(CoreError::Storage("connection pool exhausted".into()))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.error.message.contains("connection pool"));
    }

    #[tokio::test]
    async fn emission_failed_maps_to_502() {
        let (status, _) = response_parts(AppError::Core(CoreError::EmissionFailed("5 attempts".into()))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn unauthorized_keeps_message() {
        let (status, body) = response_parts(AppError::Unauthorized("no header".into())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.error.message.contains("no header"));
    }
}
