//! Board view endpoint.

use axum::{
    extract::{Query, State},
    Extension,
};
use serde::Deserialize;

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{LeadSource, Owner};
use crate::sync::{taxonomy, view, BoardView, ViewFilter};
use crate::AppState;

/// Board query parameters. List dimensions are comma-separated.
#[derive(Debug, Default, Deserialize)]
pub struct BoardQuery {
    pub tags: Option<String>,
    pub categories: Option<String>,
    pub sources: Option<String>,
    pub locations: Option<String>,
    pub owners: Option<String>,
    pub q: Option<String>,
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl BoardQuery {
    pub fn into_filter(self) -> Result<ViewFilter, AppError> {
        let sources = split_list(self.sources.as_deref())
            .iter()
            .map(|s| s.parse::<LeadSource>().map_err(AppError::BadRequest))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ViewFilter {
            tags: split_list(self.tags.as_deref()),
            categories: split_list(self.categories.as_deref()),
            sources,
            locations: split_list(self.locations.as_deref()),
            owners: split_list(self.owners.as_deref()),
            query: self.q.filter(|q| !q.trim().is_empty()),
        })
    }
}

/// GET /api/board - The caller's leads grouped into stage columns.
pub async fn get_board(
    State(state): State<AppState>,
    Extension(owner): Extension<Owner>,
    Query(params): Query<BoardQuery>,
) -> ApiResult<BoardView> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let filter = match params.into_filter() {
        Ok(filter) => filter,
        Err(e) => return error(e, revision_id),
    };

    let snapshot = match state.repo.get_snapshot(&owner).await {
        Ok(snapshot) => snapshot,
        Err(e) => return error(e, revision_id),
    };

    let tags = taxonomy::reconcile(&snapshot.tags, &snapshot.leads);
    success(
        view::project(&snapshot.leads, &tags, &filter),
        snapshot.revision_id,
    )
}
