//! Debug endpoints of the local platform.
//!
//! Seeding a snapshot does not notify anyone; post the matching creation
//! notification to `/v1/producer` to start a saga for it.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use draco_events::{SnapshotType, TagList};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::provider::SnapshotRef;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/snapshots", get(list_snapshots).post(seed_snapshot))
}

#[derive(Debug, Deserialize)]
struct SeedRequest {
    snapshot_type: SnapshotType,
    source_name: String,
    id: String,
    /// Seed into the DR account instead of the production account.
    #[serde(default)]
    dr: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    kms_key_id: Option<String>,
    #[serde(default)]
    tags: TagList,
}

#[derive(Debug, Serialize)]
struct SnapshotView {
    account: String,
    #[serde(flatten)]
    snapshot: SnapshotRef,
    source_name: String,
    kms_key_id: Option<String>,
    tags: TagList,
    shared_with: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SnapshotsResponse {
    items: Vec<SnapshotView>,
}

fn ensure_dev(state: &AppState) -> Result<(), ApiError> {
    if state.config().dev_mode {
        Ok(())
    } else {
        Err(ApiError::not_found("debug_disabled", "debug endpoints require dev mode"))
    }
}

async fn seed_snapshot(
    State(state): State<AppState>,
    Json(request): Json<SeedRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_dev(&state)?;
    if request.id.is_empty() || request.source_name.is_empty() {
        return Err(ApiError::bad_request("invalid_request", "id and source_name are required"));
    }

    let platform = state.platform();
    let store = if request.dr {
        platform.dr_store(request.snapshot_type)
    } else {
        platform.producer_store(request.snapshot_type)
    };
    if store.snapshot(&request.id).is_some() {
        return Err(ApiError::conflict(
            "snapshot_exists",
            format!("snapshot {} already exists", request.id),
        ));
    }

    let snapshot = store.seed(
        &request.source_name,
        &request.id,
        request.created_at.unwrap_or_else(Utc::now),
        request.kms_key_id,
        request.tags,
    );
    tracing::info!(account = %store.account(), snapshot_id = %snapshot.id, "Seeded snapshot");
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn list_snapshots(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    ensure_dev(&state)?;
    let items = state
        .platform()
        .cloud
        .snapshots()
        .into_iter()
        .map(|s| SnapshotView {
            account: s.owner,
            snapshot: s.snapshot,
            source_name: s.source_name,
            kms_key_id: s.kms_key_id,
            tags: s.tags,
            shared_with: s.shared_with,
        })
        .collect();
    Ok(Json(SnapshotsResponse { items }))
}
