//! Optimistic pipeline engine.
//!
//! Each operation updates the local state immediately under the write lock,
//! releases the lock, then persists through the store. Creation and deletion
//! roll back when persistence fails; field, tag and order updates keep the
//! local change and log the failure. The change feed (see
//! [`super::feed::FeedSubscription`]) converges local state with the store.
//!
//! A lead created locally carries a temporary id until the store answers.
//! Edits made to it in the meantime are queued and flushed to the stored id
//! once the create lands.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::feed::FeedOutcome;
use super::ordering;
use super::state::{LeadCommand, Mutation, PipelineState, TagChange};
use super::taxonomy;
use super::view::{self, BoardView, ViewFilter};
use crate::errors::AppError;
use crate::models::{
    ChangeEvent, ChangeKind, Lead, LeadId, LeadPatch, LeadStatus, NewLead, Owner, TagDefinition,
    TagRow, UpdateTagRequest, DEFAULT_TAG_COLOR,
};
use crate::store::PipelineStore;

/// One user's session over the shared pipeline.
pub struct PipelineEngine<S> {
    store: Arc<S>,
    owner: Owner,
    state: Arc<RwLock<Session>>,
}

impl<S> Clone for PipelineEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            owner: self.owner.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

#[derive(Default)]
struct Session {
    board: PipelineState,
    /// Creates still waiting for a store id, keyed by temporary id.
    pending: HashMap<LeadId, PendingCreate>,
    /// Temporary ids already swapped for their stored id.
    resolved: HashMap<LeadId, LeadId>,
    /// Stored ids of creates that were deleted before they landed.
    discarded: HashSet<LeadId>,
}

/// Work held back until a create returns its stored id.
#[derive(Debug, Default)]
struct PendingCreate {
    queued: Vec<LeadCommand>,
    links: Vec<TagRow>,
    deleted: bool,
}

/// What became of a create once its stored id was known.
enum Settled {
    Live {
        lead: Lead,
        dirty: bool,
        links: Vec<TagRow>,
    },
    Deleted(Lead),
}

impl Session {
    fn resolve(&self, id: &LeadId) -> LeadId {
        self.resolved.get(id).unwrap_or(id).clone()
    }

    /// Apply `command` to the board and remember it against any pending
    /// create it touched.
    fn record(&mut self, command: LeadCommand) -> Mutation {
        let mutation = Mutation::plan(&self.board, command);
        self.board = mutation.next.clone();
        self.track(&mutation);
        mutation
    }

    fn track(&mut self, mutation: &Mutation) {
        match &mutation.command {
            LeadCommand::Insert(lead) if lead.id.is_temporary() => {
                self.pending.insert(lead.id.clone(), PendingCreate::default());
            }
            LeadCommand::Remove(id) => {
                if let Some(pending) = self.pending.get_mut(id) {
                    pending.deleted = true;
                }
            }
            command => {
                for lead in mutation.changed_leads() {
                    if let Some(pending) = self.pending.get_mut(&lead.id) {
                        pending.queued.push(command.clone());
                    }
                }
            }
        }
    }

    /// Swap `temp` for `stored`, replaying whatever was queued against it.
    fn settle(&mut self, temp: &LeadId, stored: &Lead) -> Settled {
        let pending = self.pending.remove(temp).unwrap_or_default();
        self.resolved.insert(temp.clone(), stored.id.clone());

        if pending.deleted {
            // The feed echo may already have put the stored row on the board
            self.board = self.board.apply(&LeadCommand::Remove(stored.id.clone()));
            self.discarded.insert(stored.id.clone());
            return Settled::Deleted(stored.clone());
        }

        let mut lead = stored.clone();
        for command in &pending.queued {
            command.replay_onto(temp, &mut lead);
        }
        self.board = self.board.apply(&LeadCommand::Reconcile {
            local: temp.clone(),
            stored: lead.clone(),
        });
        let links = pending
            .links
            .into_iter()
            .filter(|row| lead.has_tag(&row.name))
            .collect();
        Settled::Live {
            dirty: !pending.queued.is_empty(),
            lead,
            links,
        }
    }

    /// Forget a create the store refused. Only its own record leaves the
    /// board.
    fn abandon(&mut self, temp: &LeadId) {
        self.pending.remove(temp);
        self.board = self.board.apply(&LeadCommand::Remove(temp.clone()));
    }

    /// Where a tag link for `id` should go right now. `None` means it was
    /// queued behind a pending create.
    fn link_target(&mut self, id: &LeadId, tag: &TagRow) -> Option<LeadId> {
        if let Some(pending) = self.pending.get_mut(id) {
            pending.links.push(tag.clone());
            return None;
        }
        let id = self.resolve(id);
        (!id.is_temporary()).then_some(id)
    }
}

fn lead_not_found(id: &LeadId) -> AppError {
    AppError::NotFound(format!("Lead {} not found", id))
}

impl<S: PipelineStore> PipelineEngine<S> {
    pub fn new(store: Arc<S>, owner: Owner) -> Self {
        Self {
            store,
            owner,
            state: Arc::new(RwLock::new(Session::default())),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub async fn snapshot(&self) -> PipelineState {
        self.state.read().await.board.clone()
    }

    pub async fn lead(&self, id: &LeadId) -> Option<Lead> {
        let session = self.state.read().await;
        session.board.lead(&session.resolve(id)).cloned()
    }

    pub async fn taxonomy(&self) -> Vec<TagDefinition> {
        self.state.read().await.board.taxonomy()
    }

    pub async fn view(&self, filter: &ViewFilter) -> BoardView {
        let session = self.state.read().await;
        view::project(session.board.leads(), &session.board.taxonomy(), filter)
    }

    /// Replace local state with the store's current leads and tags.
    ///
    /// Records still waiting for their first write are kept.
    pub async fn load(&self) -> Result<(), AppError> {
        let leads = self.store.list_leads(&self.owner).await?;
        let tags = self.store.list_tags(self.owner.scope()).await?;

        let mut session = self.state.write().await;
        let mut merged: Vec<Lead> = session
            .board
            .leads()
            .iter()
            .filter(|l| l.id.is_temporary())
            .cloned()
            .collect();
        tracing::info!(
            "Loaded {} leads and {} tags for {}",
            leads.len(),
            tags.len(),
            self.owner.user_id
        );
        merged.extend(leads);
        session.board = PipelineState::new(merged, tags);
        Ok(())
    }

    /// Fold a change-feed event into local state.
    pub async fn apply_change(&self, event: &ChangeEvent) -> FeedOutcome {
        if event.event_type == ChangeKind::Insert
            && !event
                .new
                .as_ref()
                .is_some_and(|lead| lead.visible_to(&self.owner))
        {
            return FeedOutcome::Ignored;
        }
        let mut session = self.state.write().await;
        // A late INSERT echo must not bring back a lead deleted mid-create
        if event.event_type == ChangeKind::Insert
            && event.lead_id().is_some_and(|id| session.discarded.contains(id))
        {
            return FeedOutcome::Ignored;
        }
        session.board.merge_event(event)
    }

    /// Apply `command` to the current state unconditionally.
    async fn apply(&self, command: LeadCommand) -> Mutation {
        self.state.write().await.record(command)
    }

    /// Build a command for the lead `id` currently resolves to and apply it.
    /// `Ok(None)` means there was nothing to change.
    async fn commit<F>(
        &self,
        id: &LeadId,
        build: F,
    ) -> Result<Option<(LeadId, Mutation)>, AppError>
    where
        F: FnOnce(&PipelineState, &LeadId) -> Result<Option<LeadCommand>, AppError>,
    {
        let mut session = self.state.write().await;
        let id = session.resolve(id);
        let Some(command) = build(&session.board, &id)? else {
            return Ok(None);
        };
        Ok(Some((id, session.record(command))))
    }

    async fn restore(&self, mutation: &Mutation) {
        self.state.write().await.board = mutation.rollback();
    }

    async fn persist_lead(&self, lead: &Lead) {
        if lead.id.is_temporary() {
            tracing::debug!("Lead {} has no store id yet, queued behind its create", lead.id);
            return;
        }
        if let Err(e) = self.store.update_lead(lead).await {
            tracing::warn!("Failed to persist lead {}: {}", lead.id, e);
        }
    }

    /// The id to address the store with, if the lead has one yet.
    async fn stored_id(&self, id: &LeadId) -> Option<LeadId> {
        let id = self.state.read().await.resolve(id);
        (!id.is_temporary()).then_some(id)
    }

    // ==================== LEADS ====================

    /// Add a lead to the board.
    ///
    /// A lead whose dedup key already exists for this owner resolves to the
    /// existing record instead of being inserted. Edits made to the new
    /// record before the store answers are carried over to the stored one.
    pub async fn create_lead(&self, request: NewLead) -> Result<Lead, AppError> {
        if request.name.trim().is_empty() {
            return Err(AppError::Validation("Lead name is required".to_string()));
        }

        let local = Lead::from_request(&request, &self.owner, LeadId::temporary(), Utc::now());
        let temp_id = local.id.clone();
        self.apply(LeadCommand::Insert(local.clone())).await;

        if let Some(key) = local.place_id.as_deref() {
            match self.store.find_lead_by_place_id(&self.owner, key).await {
                Ok(Some(existing)) => {
                    tracing::info!("Place {} already in pipeline as {}", key, existing.id);
                    return Ok(self.settle(&temp_id, &existing).await);
                }
                Ok(None) => {}
                Err(e) => {
                    self.abandon(&temp_id).await;
                    return Err(e);
                }
            }
        }

        match self.store.insert_lead(&local).await {
            Ok(stored) => {
                tracing::info!("Created lead {} ({})", stored.id, stored.name);
                Ok(self.settle(&temp_id, &stored).await)
            }
            Err(err @ AppError::Duplicate { .. }) => {
                // Another session inserted the same place in between.
                let existing = match local.place_id.as_deref() {
                    Some(key) => self
                        .store
                        .find_lead_by_place_id(&self.owner, key)
                        .await
                        .ok()
                        .flatten(),
                    None => None,
                };
                match existing {
                    Some(existing) => Ok(self.settle(&temp_id, &existing).await),
                    None => {
                        self.abandon(&temp_id).await;
                        Err(err)
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to create lead {}: {}", local.name, e);
                self.abandon(&temp_id).await;
                Err(e)
            }
        }
    }

    /// Swap the temporary record for `stored` and flush whatever was queued
    /// against it while the create was in flight.
    async fn settle(&self, temp: &LeadId, stored: &Lead) -> Lead {
        let settled = self.state.write().await.settle(temp, stored);
        match settled {
            Settled::Deleted(lead) => {
                tracing::info!("Lead {} was deleted while being created", lead.id);
                if let Err(e) = self.store.delete_lead(&lead.id).await {
                    tracing::warn!("Failed to delete lead {}: {}", lead.id, e);
                }
                lead
            }
            Settled::Live { lead, dirty, links } => {
                if dirty {
                    self.persist_lead(&lead).await;
                }
                for tag in &links {
                    if let Err(e) = self.store.link_tag(&lead.id, &tag.id).await {
                        tracing::warn!(
                            "Failed to link tag {} to lead {}: {}",
                            tag.name,
                            lead.id,
                            e
                        );
                    }
                }
                lead
            }
        }
    }

    async fn abandon(&self, temp: &LeadId) {
        self.state.write().await.abandon(temp);
    }

    /// Merge `patch` into a lead. Persistence failures are logged and the
    /// local change is kept.
    pub async fn update_lead(&self, id: &LeadId, patch: LeadPatch) -> Result<Lead, AppError> {
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::Validation("Lead name is required".to_string()));
        }

        let now = Utc::now();
        let committed = self
            .commit(id, |state, id| {
                state.lead(id).ok_or_else(|| lead_not_found(id))?;
                Ok(Some(LeadCommand::Patch {
                    id: id.clone(),
                    patch,
                    at: now,
                }))
            })
            .await?;

        let updated = committed
            .and_then(|(id, m)| m.next.lead(&id).cloned())
            .ok_or_else(|| lead_not_found(id))?;
        self.persist_lead(&updated).await;
        Ok(updated)
    }

    /// Remove a lead. If the store rejects the delete, the board is put back
    /// exactly as it was.
    ///
    /// Deleting a lead whose create is still in flight only marks it; the
    /// delete reaches the store once the create lands.
    pub async fn delete_lead(&self, id: &LeadId) -> Result<(), AppError> {
        let committed = self
            .commit(id, |state, id| {
                state.lead(id).ok_or_else(|| lead_not_found(id))?;
                Ok(Some(LeadCommand::Remove(id.clone())))
            })
            .await?;
        let Some((id, mutation)) = committed else {
            return Ok(());
        };
        if id.is_temporary() {
            return Ok(());
        }

        if let Err(e) = self.store.delete_lead(&id).await {
            tracing::warn!("Failed to delete lead {}, restoring: {}", id, e);
            self.restore(&mutation).await;
            return Err(e);
        }
        tracing::info!("Deleted lead {}", id);
        Ok(())
    }

    /// Move a lead to `index` within the `to` column. Returns `false` when
    /// the lead already sits there.
    pub async fn move_lead(
        &self,
        id: &LeadId,
        to: LeadStatus,
        index: usize,
    ) -> Result<bool, AppError> {
        let now = Utc::now();
        let committed = self
            .commit(id, |state, id| {
                state.lead(id).ok_or_else(|| lead_not_found(id))?;
                Ok(ordering::plan_move(state.leads(), id, to, index, now)
                    .map(|plan| LeadCommand::Rerank(plan.ranked)))
            })
            .await?;
        let Some((_, mutation)) = committed else {
            return Ok(false);
        };

        if let LeadCommand::Rerank(ranked) = &mutation.command {
            // Pending creates pick up their rank when they settle
            let batch: Vec<Lead> = ranked
                .iter()
                .filter(|l| !l.id.is_temporary())
                .cloned()
                .collect();
            if let Err(e) = self.store.upsert_leads(&batch).await {
                tracing::warn!(
                    "Failed to persist order of {} column: {}",
                    to.as_str(),
                    e
                );
            }
        }
        Ok(true)
    }

    // ==================== TAGS ====================

    fn new_tag_row(&self, name: &str, color: Option<&str>) -> TagRow {
        TagRow {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            color: color.unwrap_or(DEFAULT_TAG_COLOR).to_string(),
            scope: self.owner.scope().to_string(),
            created_by: self.owner.user_id.clone(),
            created_at: Utc::now(),
        }
    }

    /// Create a canonical tag, or return the one that already has `name`.
    pub async fn create_tag(&self, name: &str, color: Option<&str>) -> Result<TagRow, AppError> {
        let name = taxonomy::normalize_name(name)?;
        let known = taxonomy::find_by_name(self.state.read().await.board.tags(), &name).cloned();
        if let Some(existing) = known {
            return Ok(existing);
        }

        let row = self.new_tag_row(&name, color);
        let stored = match self.store.insert_tag(&row).await {
            Ok(stored) => stored,
            Err(err @ AppError::Duplicate { .. }) => {
                let tags = self.store.list_tags(self.owner.scope()).await?;
                tags.into_iter().find(|t| t.name == name).ok_or(err)?
            }
            Err(e) => return Err(e),
        };

        self.apply(LeadCommand::Retag(TagChange::Define(stored.clone())))
            .await;
        Ok(stored)
    }

    /// Attach `name` to a lead, creating the canonical tag if needed.
    pub async fn add_tag(&self, id: &LeadId, name: &str) -> Result<(), AppError> {
        let name = taxonomy::normalize_name(name)?;
        let now = Utc::now();
        let committed = self
            .commit(id, |state, id| {
                let lead = state.lead(id).ok_or_else(|| lead_not_found(id))?;
                if lead.has_tag(&name) {
                    return Ok(None);
                }
                let mut tags = lead.tags.clone();
                tags.push(name.clone());
                Ok(Some(LeadCommand::Patch {
                    id: id.clone(),
                    patch: LeadPatch::tags(tags),
                    at: now,
                }))
            })
            .await?;
        let Some((id, mutation)) = committed else {
            return Ok(());
        };

        let tag = match self.create_tag(&name, None).await {
            Ok(tag) => Some(tag),
            Err(e) => {
                tracing::warn!("Failed to create tag {}: {}", name, e);
                None
            }
        };

        if let Some(lead) = mutation.next.lead(&id) {
            self.persist_lead(lead).await;
        }
        let Some(tag) = tag else {
            return Ok(());
        };
        let target = self.state.write().await.link_target(&id, &tag);
        if let Some(target) = target {
            if let Err(e) = self.store.link_tag(&target, &tag.id).await {
                tracing::warn!("Failed to link tag {} to lead {}: {}", tag.name, target, e);
            }
        }
        Ok(())
    }

    pub async fn remove_tag(&self, id: &LeadId, name: &str) -> Result<(), AppError> {
        let now = Utc::now();
        let committed = self
            .commit(id, |state, id| {
                let lead = state.lead(id).ok_or_else(|| lead_not_found(id))?;
                if !lead.has_tag(name) {
                    return Ok(None);
                }
                let tags = lead.tags.iter().filter(|t| *t != name).cloned().collect();
                Ok(Some(LeadCommand::Patch {
                    id: id.clone(),
                    patch: LeadPatch::tags(tags),
                    at: now,
                }))
            })
            .await?;
        let Some((id, mutation)) = committed else {
            return Ok(());
        };

        if let Some(lead) = mutation.next.lead(&id) {
            self.persist_lead(lead).await;
        }
        if let Some(target) = self.stored_id(&id).await {
            if let Err(e) = self.store.unlink_tag(&target, self.owner.scope(), name).await {
                tracing::warn!("Failed to unlink tag {} from lead {}: {}", name, target, e);
            }
        }
        Ok(())
    }

    /// Delete a tag everywhere.
    ///
    /// Virtual tags only exist on leads, so each affected loaded lead is
    /// written back. Canonical tags are deleted and stripped store-wide by
    /// the cascade, which also covers leads this session never loaded.
    pub async fn delete_tag(&self, definition: &TagDefinition) -> Result<(), AppError> {
        let name = definition.name().to_string();
        let tag_id = match definition {
            TagDefinition::Canonical(row) => Some(row.id.clone()),
            TagDefinition::Virtual { .. } => None,
        };

        let mutation = self
            .apply(LeadCommand::Retag(TagChange::Remove {
                tag_id: tag_id.clone(),
                name: name.clone(),
            }))
            .await;

        match tag_id {
            None => {
                for lead in mutation.changed_leads() {
                    self.persist_lead(&lead).await;
                }
            }
            Some(tag_id) => {
                if let Err(e) = self.store.delete_tag(&tag_id).await {
                    tracing::warn!("Failed to delete tag {}: {}", name, e);
                }
                match self.store.cascade_remove_tag(self.owner.scope(), &name).await {
                    Ok(affected) => {
                        tracing::info!("Removed tag {} from {} leads", name, affected)
                    }
                    Err(e) => tracing::warn!("Failed to cascade removal of tag {}: {}", name, e),
                }
            }
        }
        Ok(())
    }

    /// Rename and/or recolor a canonical tag, rewriting every lead that
    /// carries the old name.
    pub async fn rename_tag(
        &self,
        id: &str,
        changes: UpdateTagRequest,
    ) -> Result<TagRow, AppError> {
        let new_name = changes
            .name
            .as_deref()
            .map(taxonomy::normalize_name)
            .transpose()?;

        let (row, old_name) = {
            let session = self.state.read().await;
            let current = session
                .board
                .tag(id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Tag {} not found", id)))?;
            let mut row = current.clone();
            if let Some(name) = &new_name {
                if *name != current.name {
                    if let Some(other) = taxonomy::find_by_name(session.board.tags(), name) {
                        return Err(AppError::Duplicate {
                            message: format!("Tag {} already exists", name),
                            existing_id: Some(other.id.clone()),
                        });
                    }
                }
                row.name = name.clone();
            }
            if let Some(color) = &changes.color {
                row.color = color.clone();
            }
            (row, current.name)
        };

        self.apply(LeadCommand::Retag(TagChange::Rename {
            row: row.clone(),
            from: old_name.clone(),
        }))
        .await;

        let changes = UpdateTagRequest {
            name: new_name,
            color: changes.color,
        };
        if let Err(e) = self.store.update_tag(id, &changes).await {
            tracing::warn!("Failed to update tag {}: {}", old_name, e);
        }
        if row.name != old_name {
            match self
                .store
                .cascade_rename_tag(self.owner.scope(), &old_name, &row.name)
                .await
            {
                Ok(affected) => tracing::info!(
                    "Renamed tag {} to {} on {} leads",
                    old_name,
                    row.name,
                    affected
                ),
                Err(e) => tracing::warn!("Failed to cascade rename of tag {}: {}", old_name, e),
            }
        }
        Ok(row)
    }
}
