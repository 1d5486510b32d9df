//! REST API module.
//!
//! Handlers behind `/api`. Every route runs as the [`Owner`] resolved by
//! the auth layer.

mod board;
mod leads;
mod pipeline;
mod quota;
mod search;
mod tags;

pub use board::*;
pub use leads::*;
pub use pipeline::*;
pub use quota::*;
pub use search::*;
pub use tags::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::{Lead, Owner};
use crate::AppState;

/// Success response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub revision_id: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T, revision_id: i64) -> Self {
        Self {
            success: true,
            data,
            revision_id,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, crate::errors::AppErrorWithRevision>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T, revision_id: i64) -> ApiResult<T> {
    Ok(ApiResponse::new(data, revision_id))
}

/// Create an error API response.
pub fn error<T: Serialize>(err: crate::errors::AppError, revision_id: i64) -> ApiResult<T> {
    Err(crate::errors::AppErrorWithRevision {
        error: err,
        revision_id,
    })
}

/// Load a lead, treating leads the caller cannot see as missing.
pub(crate) async fn visible_lead(
    state: &AppState,
    owner: &Owner,
    id: &str,
) -> Result<Lead, AppError> {
    state
        .repo
        .get_lead(id)
        .await?
        .filter(|lead| lead.visible_to(owner))
        .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", id)))
}
