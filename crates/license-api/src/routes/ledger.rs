//! Paginated read access to an organization's usage ledger.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use license_storage::models::{LedgerEntryType, UsageLedgerEntry};
use serde::{Deserialize, Serialize};

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ledger", get(read))
}

#[derive(Debug, Deserialize)]
struct LedgerQuery {
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Serialize)]
struct LedgerEntryResponse {
    id: String,
    entry_type: LedgerEntryType,
    site_id: Option<String>,
    data: serde_json::Value,
    signature: Option<String>,
    created_at: String,
}

impl From<UsageLedgerEntry> for LedgerEntryResponse {
    fn from(entry: UsageLedgerEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            entry_type: entry.entry_type,
            site_id: entry.site_id.map(|s| s.as_str().to_string()),
            data: entry.data,
            signature: entry.signature,
            created_at: entry.created_at.to_canonical_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct LedgerPage {
    entries: Vec<LedgerEntryResponse>,
    total: u64,
}

async fn read(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(q): Query<LedgerQuery>,
) -> Result<Json<LedgerPage>, AppError> {
    let (entries, total) = state.ledger.read(&caller.org_id, q.limit, q.offset).await?;
    Ok(Json(LedgerPage {
        entries: entries.into_iter().map(LedgerEntryResponse::from).collect(),
        total,
    }))
}
