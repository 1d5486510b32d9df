//! Store metadata shared by every response.

use serde::{Deserialize, Serialize};

use super::{Lead, TagRow};

/// Revision information for change detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionInfo {
    pub revision_id: i64,
    pub generated_at: String,
}

/// Everything an owner's session loads at start (or on a full reload).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSnapshot {
    pub revision_id: i64,
    pub leads: Vec<Lead>,
    pub tags: Vec<TagRow>,
}
