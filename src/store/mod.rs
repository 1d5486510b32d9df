//! The shared-store seam the synchronization engine persists through.
//!
//! [`crate::db::Repository`] is the SQLite implementation; tests use an
//! in-memory store with failure injection.

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::errors::AppError;
use crate::models::{ChangeEvent, Lead, LeadId, Owner, TagRow, UpdateTagRequest};

/// Change feed buffer. Subscribers further behind than this get `Lagged`.
pub const FEED_CAPACITY: usize = 256;

/// Create the sending half of a lead change feed.
pub fn feed_channel() -> broadcast::Sender<ChangeEvent> {
    let (tx, _) = broadcast::channel(FEED_CAPACITY);
    tx
}

/// Row-level operations plus the bulk tag RPCs and the change feed.
#[async_trait]
pub trait PipelineStore: Send + Sync + 'static {
    /// All leads visible to `owner`.
    async fn list_leads(&self, owner: &Owner) -> Result<Vec<Lead>, AppError>;

    async fn get_lead(&self, id: &LeadId) -> Result<Option<Lead>, AppError>;

    /// The owner's lead carrying the given dedup key, if any.
    async fn find_lead_by_place_id(
        &self,
        owner: &Owner,
        place_id: &str,
    ) -> Result<Option<Lead>, AppError>;

    /// Insert a new lead. Temporary identities are replaced by a store id.
    async fn insert_lead(&self, lead: &Lead) -> Result<Lead, AppError>;

    /// Insert-or-update a batch of leads by identity.
    async fn upsert_leads(&self, leads: &[Lead]) -> Result<Vec<Lead>, AppError>;

    /// Overwrite an existing lead by identity.
    async fn update_lead(&self, lead: &Lead) -> Result<Lead, AppError>;

    async fn delete_lead(&self, id: &LeadId) -> Result<(), AppError>;

    /// Canonical tag rows in `scope`, ordered by name.
    async fn list_tags(&self, scope: &str) -> Result<Vec<TagRow>, AppError>;

    async fn insert_tag(&self, tag: &TagRow) -> Result<TagRow, AppError>;

    async fn update_tag(&self, id: &str, changes: &UpdateTagRequest) -> Result<TagRow, AppError>;

    async fn delete_tag(&self, id: &str) -> Result<(), AppError>;

    /// Record a tag assignment row.
    async fn link_tag(&self, lead_id: &LeadId, tag_id: &str) -> Result<(), AppError>;

    /// Remove the assignment row for the tag named `name` in `scope`.
    async fn unlink_tag(&self, lead_id: &LeadId, scope: &str, name: &str)
        -> Result<(), AppError>;

    /// Rename a tag on every lead in `scope`, loaded locally or not.
    async fn cascade_rename_tag(
        &self,
        scope: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<u64, AppError>;

    /// Strip a tag from every lead in `scope`, loaded locally or not.
    async fn cascade_remove_tag(&self, scope: &str, name: &str) -> Result<u64, AppError>;

    /// Subscribe to lead insert/update/delete events.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}
