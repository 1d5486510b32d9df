//! Row-level change events published by the store.

use serde::{Deserialize, Serialize};

use super::{Lead, LeadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One event on the lead change feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub event_type: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Lead>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Lead>,
    /// Store revision after the write that produced this event.
    pub revision: i64,
}

impl ChangeEvent {
    pub fn insert(lead: Lead, revision: i64) -> Self {
        Self {
            event_type: ChangeKind::Insert,
            new: Some(lead),
            old: None,
            revision,
        }
    }

    pub fn update(old: Option<Lead>, new: Lead, revision: i64) -> Self {
        Self {
            event_type: ChangeKind::Update,
            new: Some(new),
            old,
            revision,
        }
    }

    pub fn delete(old: Lead, revision: i64) -> Self {
        Self {
            event_type: ChangeKind::Delete,
            new: None,
            old: Some(old),
            revision,
        }
    }

    /// Identity of the affected record.
    pub fn lead_id(&self) -> Option<&LeadId> {
        self.new
            .as_ref()
            .or(self.old.as_ref())
            .map(|lead| &lead.id)
    }
}
