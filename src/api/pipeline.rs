//! Snapshot and revision endpoints.

use axum::{extract::State, Extension};

use super::{success, ApiResult};
use crate::errors::AppErrorWithRevision;
use crate::models::{Owner, PipelineSnapshot, RevisionInfo};
use crate::AppState;

/// GET /api/pipeline - Everything a session loads at start.
pub async fn get_pipeline(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
) -> ApiResult<PipelineSnapshot> {
    let snapshot = state
        .repo
        .get_snapshot(&owner)
        .await
        .map_err(|e| AppErrorWithRevision {
            error: e,
            revision_id: 0,
        })?;

    let revision_id = snapshot.revision_id;
    success(snapshot, revision_id)
}

/// GET /api/revision - Get the current revision info.
pub async fn get_revision(State(state): State<AppState>) -> ApiResult<RevisionInfo> {
    let revision_info = state
        .repo
        .get_revision_info()
        .await
        .map_err(|e| AppErrorWithRevision {
            error: e,
            revision_id: 0,
        })?;

    let revision_id = revision_info.revision_id;
    success(revision_info, revision_id)
}
