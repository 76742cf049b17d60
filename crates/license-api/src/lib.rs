//! # license-api — Axum HTTP Surface for the Trust Plane
//!
//! Assembles the license-issuance and key-management core library
//! crates into a single Axum application with Tower middleware for
//! authentication, request tracing, and metrics.
//!
//! ## API Surface
//!
//! | Prefix               | Module                | Concern |
//! |-----------------------|-----------------------|---------|
//! | `/orgs`               | [`routes::orgs`]      | Organization creation/lookup |
//! | `/cml*`               | [`routes::cml`]       | Customer Master License upload/lookup/refresh |
//! | `/sites*`             | [`routes::sites`]     | Site License issuance, heartbeat, revoke |
//! | `/validate`           | [`routes::validate`]  | Offline chain-of-trust validation |
//! | `/manifests*`         | [`routes::manifests`] | Usage manifest generation + emission |
//! | `/ledger`             | [`routes::ledger`]    | Paginated usage ledger read |
//! | `/keys*`              | [`routes::keys`]      | KMS key lifecycle |
//! | `/licenses*`          | [`routes::licenses`]  | Portable signed license file generate/validate |
//!
//! ## Middleware Stack
//!
//! ```text
//! TraceLayer -> MetricsMiddleware -> AuthMiddleware
//! ```
//!
//! `/orgs` and the health probes are mounted outside the auth layer —
//! an org must be mintable before it has any credential to present, and
//! a liveness/readiness probe has no caller identity to authenticate.

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::extract::State;
use axum::middleware::from_fn;
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::Router;

use crate::middleware::metrics::ApiMetrics;
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes (`/health/*`) and `/orgs` are mounted outside the auth
/// middleware so an operator can provision an organization (and thereby
/// a bearer token, via [`auth::issue_bearer_token`]) before that
/// organization has any other credential to present.
pub fn app(state: AppState) -> Router {
    let metrics = ApiMetrics::new();

    let public = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness))
        .merge(routes::orgs::router())
        .with_state(state.clone());

    let authenticated = Router::new()
        .merge(routes::cml::router())
        .merge(routes::sites::router())
        .merge(routes::validate::router())
        .merge(routes::manifests::router())
        .merge(routes::ledger::router())
        .merge(routes::keys::router())
        .merge(routes::licenses::router())
        .layer(from_fn_with_state(state.jwt_secret.clone(), auth::auth_middleware))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(axum::Extension(metrics))
        .with_state(state);

    Router::new()
        .merge(public)
        .merge(authenticated)
        .layer(middleware::tracing_layer::layer())
}

/// Liveness probe — always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe. Storage here is a repository trait object that may
/// be backed by Postgres, so readiness is just "the router was built
/// and state is reachable" — a real liveness-through-storage check
/// would mean a round-trip query, which is more than a readiness probe
/// should cost on every poll.
async fn readiness(State(_state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ready",
        "checks": { "router": "ok" },
    });
    (axum::http::StatusCode::OK, axum::Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn readiness_returns_json_health_status() {
        let router = app(test_state());
        let req = Request::builder()
            .method("GET")
            .uri("/health/readiness")
            .body(Body::empty())
            .unwrap();

        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["status"], "ready");
        assert_eq!(body["checks"]["router"], "ok");
    }

    #[tokio::test]
    async fn liveness_returns_ok() {
        let router = app(test_state());
        let req = Request::builder()
            .method("GET")
            .uri("/health/liveness")
            .body(Body::empty())
            .unwrap();

        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_route_without_bearer_token_is_rejected() {
        let router = app(test_state());
        let req = Request::builder()
            .method("GET")
            .uri("/ledger")
            .body(Body::empty())
            .unwrap();

        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn org_creation_does_not_require_a_bearer_token() {
        let router = app(test_state());
        let req = Request::builder()
            .method("POST")
            .uri("/orgs")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"org_id":"acme","display_name":"Acme Corp"}"#))
            .unwrap();

        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
