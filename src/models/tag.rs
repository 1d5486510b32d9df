//! Tag models: persisted rows and the reconciled definition union.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Color given to tags that have no canonical row.
pub const DEFAULT_TAG_COLOR: &str = "#94a3b8";

/// Identifier prefix for synthesized tag definitions.
pub const VIRTUAL_TAG_PREFIX: &str = "virtual-";

/// A persisted tag definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRow {
    pub id: String,
    pub name: String,
    pub color: String,
    /// Owner scope the name is unique within (organization or user id).
    pub scope: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// A tag as the board sees it: either backed by a row, or synthesized from
/// a name that only appears on leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagDefinition {
    Canonical(TagRow),
    Virtual { name: String },
}

impl TagDefinition {
    pub fn name(&self) -> &str {
        match self {
            TagDefinition::Canonical(row) => &row.name,
            TagDefinition::Virtual { name } => name,
        }
    }

    pub fn id(&self) -> String {
        match self {
            TagDefinition::Canonical(row) => row.id.clone(),
            TagDefinition::Virtual { name } => format!("{}{}", VIRTUAL_TAG_PREFIX, name),
        }
    }

    pub fn color(&self) -> &str {
        match self {
            TagDefinition::Canonical(row) => &row.color,
            TagDefinition::Virtual { .. } => DEFAULT_TAG_COLOR,
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, TagDefinition::Virtual { .. })
    }
}

/// Wire form of a [`TagDefinition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagView {
    pub id: String,
    pub name: String,
    pub color: String,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<&TagDefinition> for TagView {
    fn from(def: &TagDefinition) -> Self {
        Self {
            id: def.id(),
            name: def.name().to_string(),
            color: def.color().to_string(),
            is_virtual: def.is_virtual(),
            created_at: match def {
                TagDefinition::Canonical(row) => Some(row.created_at),
                TagDefinition::Virtual { .. } => None,
            },
        }
    }
}

/// Request body for creating a new tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTagRequest {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

/// Request body for updating (renaming / recoloring) a tag.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTagRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Request body for the cascade-rename RPC.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeRenameRequest {
    pub old_name: String,
    pub new_name: String,
}

/// Request body for the cascade-remove RPC.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeRemoveRequest {
    pub name: String,
}

/// Number of leads touched by a cascade.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeResult {
    pub affected: u64,
}
