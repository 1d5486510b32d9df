//! Lead API endpoints.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;

use super::{error, success, visible_lead, ApiResult};
use crate::errors::AppError;
use crate::models::{BatchUpsertRequest, Lead, LeadId, LeadPatch, LeadStatus, NewLead, Owner};
use crate::sync::ordering;
use crate::AppState;

/// Request body for moving a lead on the board.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveLeadRequest {
    pub status: LeadStatus,
    pub index: usize,
}

/// GET /api/leads - List the caller's leads.
pub async fn list_leads(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
) -> ApiResult<Vec<Lead>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match state.repo.list_leads(&owner).await {
        Ok(leads) => success(leads, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/leads/:id - Get a single lead.
pub async fn get_lead(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
) -> ApiResult<Lead> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    match visible_lead(&state, &owner, &id).await {
        Ok(lead) => success(lead, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/leads - Create a new lead.
pub async fn create_lead(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Json(request): Json<NewLead>,
) -> ApiResult<Lead> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.name.trim().is_empty() {
        return error(
            AppError::Validation("Lead name is required".to_string()),
            revision_id,
        );
    }

    let lead = Lead::from_request(&request, &owner, LeadId::temporary(), Utc::now());
    match state.repo.insert_lead(&lead).await {
        Ok(lead) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(lead, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/leads/:id - Merge-patch a lead.
pub async fn update_lead(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    Json(patch): Json<LeadPatch>,
) -> ApiResult<Lead> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return error(
            AppError::Validation("Lead name cannot be empty".to_string()),
            revision_id,
        );
    }
    if let Err(e) = visible_lead(&state, &owner, &id).await {
        return error(e, revision_id);
    }

    match state.repo.patch_lead(&id, &patch).await {
        Ok(lead) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(lead, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/leads/:id - Delete a lead.
pub async fn delete_lead(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let lead = match visible_lead(&state, &owner, &id).await {
        Ok(lead) => lead,
        Err(e) => return error(e, revision_id),
    };

    match state.repo.delete_lead(&lead.id).await {
        Ok(()) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success((), new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/leads/:id/move - Move a lead to a position in a column.
///
/// Returns the re-ranked destination column, or an empty list when the lead
/// already sits at that position.
pub async fn move_lead(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Path(id): Path<String>,
    Json(request): Json<MoveLeadRequest>,
) -> ApiResult<Vec<Lead>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let leads = match state.repo.list_leads(&owner).await {
        Ok(leads) => leads,
        Err(e) => return error(e, revision_id),
    };
    let id = LeadId::from(id);
    if !leads.iter().any(|l| l.id == id) {
        return error(AppError::NotFound(format!("Lead {} not found", id)), revision_id);
    }

    let Some(plan) = ordering::plan_move(&leads, &id, request.status, request.index, Utc::now())
    else {
        return success(Vec::new(), revision_id);
    };

    match state.repo.upsert_leads(&plan.ranked).await {
        Ok(ranked) => {
            tracing::debug!(
                "Moved lead {} from {} to {}[{}]",
                plan.lead_id,
                plan.from.as_str(),
                plan.to.as_str(),
                plan.index
            );
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(ranked, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/leads/batch - Insert-or-update many leads in one write.
pub async fn batch_upsert_leads(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Json(request): Json<BatchUpsertRequest>,
) -> ApiResult<Vec<Lead>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if request.leads.is_empty() {
        return error(
            AppError::Validation("No leads provided".to_string()),
            revision_id,
        );
    }
    if let Some(foreign) = request.leads.iter().find(|l| !l.visible_to(&owner)) {
        return error(
            AppError::Validation(format!("Lead {} does not belong to the caller", foreign.id)),
            revision_id,
        );
    }
    for lead in &request.leads {
        let Some(id) = lead.id.as_stored() else {
            continue;
        };
        match state.repo.get_lead(id).await {
            Ok(Some(existing)) if !existing.visible_to(&owner) => {
                return error(AppError::NotFound(format!("Lead {} not found", id)), revision_id);
            }
            Ok(_) => {}
            Err(e) => return error(e, revision_id),
        }
    }

    match state.repo.upsert_leads(&request.leads).await {
        Ok(leads) => {
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(leads, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}
