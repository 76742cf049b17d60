//! Organization creation and lookup — the point of creation for an
//! `org_id` that every other route (CML upload, site issuance, manifest
//! emission) requires to already exist.
//!
//! The core's own invariant — `CmlRegistry::upload` and
//! `OrgKeyVault::create` both reject an `org_id`
//! [`license_registry::OrganizationRegistry`] hasn't created first —
//! makes this endpoint load-bearing rather than optional.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use license_core::OrgId;
use license_storage::models::Organization;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orgs", post(create))
        .route("/orgs/:org_id", get(get_one))
}

#[derive(Debug, Deserialize)]
struct CreateRequest {
    org_id: String,
    display_name: String,
}

#[derive(Debug, Serialize)]
struct OrgResponse {
    org_id: String,
    display_name: String,
    created_at: String,
}

impl From<Organization> for OrgResponse {
    fn from(org: Organization) -> Self {
        Self {
            org_id: org.org_id.as_str().to_string(),
            display_name: org.display_name,
            created_at: org.created_at.to_canonical_string(),
        }
    }
}

async fn create(State(state): State<AppState>, Json(req): Json<CreateRequest>) -> Result<Json<OrgResponse>, AppError> {
    let org = state.orgs.create(OrgId::new(req.org_id), req.display_name).await?;
    Ok(Json(org.into()))
}

async fn get_one(State(state): State<AppState>, Path(org_id): Path<String>) -> Result<Json<OrgResponse>, AppError> {
    let org = state.orgs.get(&OrgId::new(org_id)).await?;
    Ok(Json(org.into()))
}
