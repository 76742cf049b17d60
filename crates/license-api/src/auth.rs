//! Bearer-token authentication.
//!
//! This façade does not implement a multi-role RBAC hierarchy: a
//! caller in this domain simply *is* one organization, so there is no
//! entity/role/jurisdiction split to authenticate against. Instead a
//! bearer token is `org_id:tag`, where `tag` is the base64-std
//! HMAC-SHA256 of `org_id` under `JWT_SECRET`, and a valid token
//! injects a [`CallerIdentity`] into the request extensions for
//! downstream extractors to pull out.

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use license_core::OrgId;
use sha2::Digest;

use crate::error::AppError;

/// The organization a validated bearer token speaks for.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    /// The authenticated caller's organization.
    pub org_id: OrgId,
}

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no caller identity on this request".to_string()))
    }
}

/// Reduce an arbitrary-length `JWT_SECRET` to the fixed 32 bytes
/// `license_crypto::hmac` requires.
fn derive_hmac_key(jwt_secret: &str) -> [u8; 32] {
    let digest = sha2::Sha256::digest(jwt_secret.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// Parse `org_id:tag_b64` and verify `tag_b64` under `jwt_secret`.
fn verify_bearer(token: &str, jwt_secret: &str) -> Option<OrgId> {
    let (org_id, tag_b64) = token.split_once(':')?;
    if org_id.is_empty() {
        return None;
    }
    let tag = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, tag_b64.trim()).ok()?;
    let key = derive_hmac_key(jwt_secret);
    let ok = license_crypto::hmac::verify(&key, org_id.as_bytes(), &tag).ok()?;
    ok.then(|| OrgId::new(org_id))
}

/// Extract `Authorization: Bearer <token>`, verify it, and inject a
/// [`CallerIdentity`] into the request extensions. Rejects with 401 on
/// a missing header, malformed token, or a tag that does not verify.
pub async fn auth_middleware(
    axum::extract::State(jwt_secret): axum::extract::State<std::sync::Arc<str>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing Authorization header".to_string()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Authorization header is not a Bearer token".to_string()))?;

    let org_id = verify_bearer(token, &jwt_secret)
        .ok_or_else(|| AppError::Unauthorized("bearer token did not verify".to_string()))?;

    request.extensions_mut().insert(CallerIdentity { org_id });
    Ok(next.run(request).await)
}

/// Mint a bearer token for `org_id` under `jwt_secret`. Exposed for
/// tests and for operator tooling that provisions caller credentials.
pub fn issue_bearer_token(org_id: &OrgId, jwt_secret: &str) -> String {
    let key = derive_hmac_key(jwt_secret);
    let tag = license_crypto::hmac::hmac_sha256(&key, org_id.as_str().as_bytes())
        .expect("derive_hmac_key always returns exactly 32 bytes");
    let tag_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, tag);
    format!("{}:{}", org_id.as_str(), tag_b64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_to_the_same_org() {
        let org_id = OrgId::new("acme");
        let token = issue_bearer_token(&org_id, "a jwt secret");
        let verified = verify_bearer(&token, "a jwt secret");
        assert_eq!(verified, Some(org_id));
    }

    #[test]
    fn token_does_not_verify_under_a_different_secret() {
        let org_id = OrgId::new("acme");
        let token = issue_bearer_token(&org_id, "a jwt secret");
        assert_eq!(verify_bearer(&token, "a different secret"), None);
    }

    #[test]
    fn malformed_token_without_separator_is_rejected() {
        assert_eq!(verify_bearer("not-a-valid-token", "secret"), None);
    }

    #[test]
    fn tampered_tag_is_rejected() {
        let org_id = OrgId::new("acme");
        let mut token = issue_bearer_token(&org_id, "a jwt secret");
        token.push('x');
        assert_eq!(verify_bearer(&token, "a jwt secret"), None);
    }
}
