//! Quota endpoint.

use axum::{extract::State, Extension};

use super::{error, success, ApiResult};
use crate::models::{Owner, Quota};
use crate::AppState;

/// GET /api/quota - Remaining search and enrichment credits for the caller.
pub async fn get_quota(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
) -> ApiResult<Quota> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.get_quota(&owner.user_id).await {
        Ok(quota) => success(quota, revision_id),
        Err(e) => error(e, revision_id),
    }
}
