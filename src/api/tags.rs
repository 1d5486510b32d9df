//! Tag API endpoints.
//!
//! Renames and deletes of canonical tags cascade to every lead in the
//! caller's scope.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::Utc;
use uuid::Uuid;

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    CascadeRemoveRequest, CascadeRenameRequest, CascadeResult, CreateTagRequest, Owner, TagRow,
    TagView, UpdateTagRequest, DEFAULT_TAG_COLOR,
};
use crate::sync::taxonomy;
use crate::AppState;

/// Load a tag, treating tags outside the caller's scope as missing.
async fn scoped_tag(state: &AppState, owner: &Owner, id: &str) -> Result<TagRow, AppError> {
    state
        .repo
        .get_tag(id)
        .await?
        .filter(|tag| tag.scope == owner.scope())
        .ok_or_else(|| AppError::NotFound(format!("Tag {} not found", id)))
}

/// GET /api/tags - List canonical tags plus names only found on leads.
pub async fn list_tags(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
) -> ApiResult<Vec<TagView>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let canonical = match state.repo.list_tags(owner.scope()).await {
        Ok(tags) => tags,
        Err(e) => return error(e, revision_id),
    };
    let leads = match state.repo.list_leads(&owner).await {
        Ok(leads) => leads,
        Err(e) => return error(e, revision_id),
    };

    let views = taxonomy::reconcile(&canonical, &leads)
        .iter()
        .map(TagView::from)
        .collect();
    success(views, revision_id)
}

/// POST /api/tags - Create a new tag.
pub async fn create_tag(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Json(request): Json<CreateTagRequest>,
) -> ApiResult<TagRow> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let name = match taxonomy::normalize_name(&request.name) {
        Ok(name) => name,
        Err(e) => return error(e, revision_id),
    };

    let tag = TagRow {
        id: Uuid::new_v4().to_string(),
        name,
        color: request.color.unwrap_or_else(|| DEFAULT_TAG_COLOR.to_string()),
        scope: owner.scope().to_string(),
        created_by: owner.user_id.clone(),
        created_at: Utc::now(),
    };

    match state.repo.insert_tag(&tag).await {
        Ok(tag) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(tag, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/tags/:id - Rename and/or recolor a tag.
pub async fn update_tag(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    Json(request): Json<UpdateTagRequest>,
) -> ApiResult<TagRow> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let existing = match scoped_tag(&state, &owner, &id).await {
        Ok(tag) => tag,
        Err(e) => return error(e, revision_id),
    };

    let tag = match state.repo.update_tag(&id, &request).await {
        Ok(tag) => tag,
        Err(e) => return error(e, revision_id),
    };

    if tag.name != existing.name {
        match state
            .repo
            .cascade_rename_tag(owner.scope(), &existing.name, &tag.name)
            .await
        {
            Ok(affected) => tracing::info!(
                "Renamed tag {} to {} on {} leads",
                existing.name,
                tag.name,
                affected
            ),
            Err(e) => return error(e, revision_id),
        }
    }

    let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
    success(tag, new_revision)
}

/// DELETE /api/tags/:id - Delete a tag and strip it from every lead.
pub async fn delete_tag(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
) -> ApiResult<CascadeResult> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let existing = match scoped_tag(&state, &owner, &id).await {
        Ok(tag) => tag,
        Err(e) => return error(e, revision_id),
    };

    if let Err(e) = state.repo.delete_tag(&id).await {
        return error(e, revision_id);
    }

    match state
        .repo
        .cascade_remove_tag(owner.scope(), &existing.name)
        .await
    {
        Ok(affected) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(CascadeResult { affected }, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/tags/cascade-rename - Rename a tag name on every lead in scope.
pub async fn cascade_rename(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Json(request): Json<CascadeRenameRequest>,
) -> ApiResult<CascadeResult> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let new_name = match taxonomy::normalize_name(&request.new_name) {
        Ok(name) => name,
        Err(e) => return error(e, revision_id),
    };

    match state
        .repo
        .cascade_rename_tag(owner.scope(), &request.old_name, &new_name)
        .await
    {
        Ok(affected) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(CascadeResult { affected }, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/tags/cascade-remove - Strip a tag name from every lead in scope.
pub async fn cascade_remove(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Json(request): Json<CascadeRemoveRequest>,
) -> ApiResult<CascadeResult> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.name.trim().is_empty() {
        return error(
            AppError::Validation("Tag name is required".to_string()),
            revision_id,
        );
    }

    match state.repo.cascade_remove_tag(owner.scope(), &request.name).await {
        Ok(affected) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(CascadeResult { affected }, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
