//! Ownership of pipeline data.

use serde::{Deserialize, Serialize};

/// The user (and optional organization) a pipeline belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

impl Owner {
    pub fn new(user_id: impl Into<String>, organization_id: Option<&str>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.map(str::to_string),
        }
    }

    /// Key under which tag names are unique and tag cascades run.
    pub fn scope(&self) -> &str {
        self.organization_id.as_deref().unwrap_or(&self.user_id)
    }
}
