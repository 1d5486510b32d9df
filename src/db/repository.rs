//! Database repository for CRUD operations.
//!
//! Every lead write bumps the store revision and publishes a [`ChangeEvent`]
//! on the change feed once the write is durable.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::broadcast;

use crate::errors::AppError;
use crate::models::{
    ChangeEvent, Lead, LeadId, LeadPatch, LeadStatus, Owner, PipelineSnapshot, Quota,
    QuotaAction, RevisionInfo, TagRow, Tier, UpdateTagRequest,
};
use crate::store::{feed_channel, PipelineStore};

const LEAD_COLUMNS: &str = "id, user_id, organization_id, name, category, source, status, \
    order_index, tags, place_id, address, city, phone, email, website, rating, notes, \
    contact_name, linkedin_url, instagram_url, registry_id, added_at, closed_at, updated_at";

const INSERT_LEAD_SQL: &str = "INSERT INTO leads (id, user_id, organization_id, name, \
    category, source, status, order_index, tags, place_id, address, city, phone, email, \
    website, rating, notes, contact_name, linkedin_url, instagram_url, registry_id, added_at, \
    closed_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
    ?, ?, ?, ?)";

const UPSERT_LEAD_SQL: &str = "INSERT INTO leads (id, user_id, organization_id, name, \
    category, source, status, order_index, tags, place_id, address, city, phone, email, \
    website, rating, notes, contact_name, linkedin_url, instagram_url, registry_id, added_at, \
    closed_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
    ?, ?, ?, ?) \
    ON CONFLICT(id) DO UPDATE SET user_id = excluded.user_id, \
    organization_id = excluded.organization_id, name = excluded.name, \
    category = excluded.category, source = excluded.source, status = excluded.status, \
    order_index = excluded.order_index, tags = excluded.tags, place_id = excluded.place_id, \
    address = excluded.address, city = excluded.city, phone = excluded.phone, \
    email = excluded.email, website = excluded.website, rating = excluded.rating, \
    notes = excluded.notes, contact_name = excluded.contact_name, \
    linkedin_url = excluded.linkedin_url, instagram_url = excluded.instagram_url, \
    registry_id = excluded.registry_id, added_at = excluded.added_at, \
    closed_at = excluded.closed_at, updated_at = excluded.updated_at";

const TAG_COLUMNS: &str = "id, name, color, scope, created_by, created_at";

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    feed: broadcast::Sender<ChangeEvent>,
    default_search_quota: i64,
    default_enrich_quota: i64,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            feed: feed_channel(),
            default_search_quota: 25,
            default_enrich_quota: 10,
        }
    }

    /// Credits granted the first time a user's quota row is read.
    pub fn with_default_quota(mut self, search: i64, enrich: i64) -> Self {
        self.default_search_quota = search;
        self.default_enrich_quota = enrich;
        self
    }

    /// Get the current revision ID.
    pub async fn get_revision_id(&self) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("revision_id"))
    }

    /// Get revision info.
    pub async fn get_revision_info(&self) -> Result<RevisionInfo, AppError> {
        let row = sqlx::query("SELECT revision_id, generated_at FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(RevisionInfo {
            revision_id: row.get("revision_id"),
            generated_at: row.get("generated_at"),
        })
    }

    /// Increment the revision ID and return the new value.
    pub async fn increment_revision(&self) -> Result<i64, AppError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
            .bind(&now)
            .execute(&self.pool)
            .await?;
        self.get_revision_id().await
    }

    /// Everything the owner's session loads at start.
    pub async fn get_snapshot(&self, owner: &Owner) -> Result<PipelineSnapshot, AppError> {
        let revision_id = self.get_revision_id().await?;
        let leads = self.list_leads(owner).await?;
        let tags = self.list_tags(owner.scope()).await?;
        Ok(PipelineSnapshot {
            revision_id,
            leads,
            tags,
        })
    }

    /// Subscribe to the lead change feed.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    fn publish(&self, event: ChangeEvent) {
        // No subscribers is fine: nobody has a pipeline view open.
        let _ = self.feed.send(event);
    }

    // ==================== LEAD OPERATIONS ====================

    /// List all leads visible to the owner, in board order.
    pub async fn list_leads(&self, owner: &Owner) -> Result<Vec<Lead>, AppError> {
        let sql = format!(
            "SELECT {} FROM leads WHERE user_id = ? OR organization_id = ? \
             ORDER BY status, order_index, added_at DESC",
            LEAD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(&owner.user_id)
            .bind(&owner.organization_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(lead_from_row).collect())
    }

    /// Every lead in the store, for index rebuilds.
    pub async fn list_all_leads(&self) -> Result<Vec<Lead>, AppError> {
        let sql = format!("SELECT {} FROM leads", LEAD_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(lead_from_row).collect())
    }

    /// Get a lead by ID.
    pub async fn get_lead(&self, id: &str) -> Result<Option<Lead>, AppError> {
        let sql = format!("SELECT {} FROM leads WHERE id = ?", LEAD_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(lead_from_row))
    }

    /// Find the owner's lead with the given dedup key.
    pub async fn find_lead_by_place_id(
        &self,
        owner: &Owner,
        place_id: &str,
    ) -> Result<Option<Lead>, AppError> {
        let sql = format!(
            "SELECT {} FROM leads WHERE user_id = ? AND place_id = ?",
            LEAD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&owner.user_id)
            .bind(place_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(lead_from_row))
    }

    /// Insert a new lead, assigning a store id to temporary identities.
    pub async fn insert_lead(&self, lead: &Lead) -> Result<Lead, AppError> {
        let mut stored = lead.clone();
        if stored.id.is_temporary() {
            stored.id = new_lead_id();
        }
        stored.is_saved = false;

        if let Err(err) = bind_lead(INSERT_LEAD_SQL, &stored)
            .execute(&self.pool)
            .await
        {
            return Err(self.with_existing_id(AppError::from(err), &stored).await);
        }

        let revision = self.increment_revision().await?;
        self.publish(ChangeEvent::insert(stored.clone(), revision));

        Ok(stored)
    }

    /// Insert-or-update a batch of leads in one transaction.
    pub async fn upsert_leads(&self, leads: &[Lead]) -> Result<Vec<Lead>, AppError> {
        if leads.is_empty() {
            return Ok(Vec::new());
        }

        let select = format!("SELECT {} FROM leads WHERE id = ?", LEAD_COLUMNS);
        let now = Utc::now();
        let mut written = Vec::with_capacity(leads.len());

        // Use a transaction so the batch lands together
        let mut tx = self.pool.begin().await?;

        for lead in leads {
            let mut stored = lead.clone();
            if stored.id.is_temporary() {
                stored.id = new_lead_id();
            }
            stored.is_saved = false;
            stored.updated_at = now;

            let previous = sqlx::query(&select)
                .bind(stored.id.to_string())
                .fetch_optional(&mut *tx)
                .await?
                .as_ref()
                .map(lead_from_row);

            bind_lead(UPSERT_LEAD_SQL, &stored)
                .execute(&mut *tx)
                .await?;

            written.push((previous, stored));
        }

        // Increment revision once for the entire batch
        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        let mut result = Vec::with_capacity(written.len());
        for (previous, stored) in written {
            let event = match previous {
                Some(old) => ChangeEvent::update(Some(old), stored.clone(), revision),
                None => ChangeEvent::insert(stored.clone(), revision),
            };
            self.publish(event);
            result.push(stored);
        }

        Ok(result)
    }

    /// Overwrite an existing lead by identity.
    pub async fn update_lead(&self, lead: &Lead) -> Result<Lead, AppError> {
        let id = persisted_id(&lead.id)?;
        let existing = self
            .get_lead(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", id)))?;

        let mut stored = lead.clone();
        stored.is_saved = false;
        stored.updated_at = Utc::now();

        if let Err(err) = bind_lead(UPSERT_LEAD_SQL, &stored)
            .execute(&self.pool)
            .await
        {
            return Err(self.with_existing_id(AppError::from(err), &stored).await);
        }

        let revision = self.increment_revision().await?;
        self.publish(ChangeEvent::update(Some(existing), stored.clone(), revision));

        Ok(stored)
    }

    /// Merge-patch an existing lead.
    pub async fn patch_lead(&self, id: &str, patch: &LeadPatch) -> Result<Lead, AppError> {
        let mut lead = self
            .get_lead(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", id)))?;

        patch.apply_to(&mut lead, Utc::now());
        self.update_lead(&lead).await
    }

    /// Delete a lead.
    pub async fn delete_lead(&self, id: &LeadId) -> Result<(), AppError> {
        let id = persisted_id(id)?;
        let existing = self
            .get_lead(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", id)))?;

        let result = sqlx::query("DELETE FROM leads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Lead {} not found", id)));
        }

        let revision = self.increment_revision().await?;
        self.publish(ChangeEvent::delete(existing, revision));
        Ok(())
    }

    /// Fill in the colliding lead's id on a dedup-key violation.
    async fn with_existing_id(&self, err: AppError, lead: &Lead) -> AppError {
        let (AppError::Duplicate { message, .. }, Some(place_id)) = (&err, &lead.place_id) else {
            return err;
        };
        let owner = Owner::new(lead.user_id.clone(), None);
        match self.find_lead_by_place_id(&owner, place_id).await {
            Ok(existing) => AppError::Duplicate {
                message: message.clone(),
                existing_id: existing.map(|l| l.id.to_string()),
            },
            Err(lookup_err) => lookup_err,
        }
    }

    // ==================== TAG OPERATIONS ====================

    /// List all tags in a scope.
    pub async fn list_tags(&self, scope: &str) -> Result<Vec<TagRow>, AppError> {
        let sql = format!(
            "SELECT {} FROM tags WHERE scope = ? ORDER BY name",
            TAG_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(scope).fetch_all(&self.pool).await?;

        Ok(rows.iter().map(tag_from_row).collect())
    }

    /// Get a tag by ID.
    pub async fn get_tag(&self, id: &str) -> Result<Option<TagRow>, AppError> {
        let sql = format!("SELECT {} FROM tags WHERE id = ?", TAG_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(tag_from_row))
    }

    /// Find a tag by name within a scope.
    pub async fn find_tag_by_name(
        &self,
        scope: &str,
        name: &str,
    ) -> Result<Option<TagRow>, AppError> {
        let sql = format!(
            "SELECT {} FROM tags WHERE scope = ? AND name = ?",
            TAG_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(scope)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(tag_from_row))
    }

    /// Create a new tag.
    pub async fn insert_tag(&self, tag: &TagRow) -> Result<TagRow, AppError> {
        let result = sqlx::query(
            r#"INSERT INTO tags (id, name, color, scope, created_by, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&tag.id)
        .bind(&tag.name)
        .bind(&tag.color)
        .bind(&tag.scope)
        .bind(&tag.created_by)
        .bind(tag.created_at)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            return match AppError::from(err) {
                AppError::Duplicate { message, .. } => {
                    let existing = self.find_tag_by_name(&tag.scope, &tag.name).await?;
                    Err(AppError::Duplicate {
                        message,
                        existing_id: existing.map(|t| t.id),
                    })
                }
                other => Err(other),
            };
        }

        self.increment_revision().await?;
        Ok(tag.clone())
    }

    /// Rename and/or recolor a tag. Leads are not touched here; see
    /// [`Repository::cascade_rename_tag`].
    pub async fn update_tag(
        &self,
        id: &str,
        changes: &UpdateTagRequest,
    ) -> Result<TagRow, AppError> {
        let existing = self
            .get_tag(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Tag {} not found", id)))?;

        let name = match &changes.name {
            Some(name) if name.trim().is_empty() => {
                return Err(AppError::Validation("Tag name is required".to_string()));
            }
            Some(name) => name.trim().to_string(),
            None => existing.name.clone(),
        };
        let color = changes.color.clone().unwrap_or(existing.color.clone());

        sqlx::query("UPDATE tags SET name = ?, color = ? WHERE id = ?")
            .bind(&name)
            .bind(&color)
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.increment_revision().await?;

        Ok(TagRow {
            name,
            color,
            ..existing
        })
    }

    /// Delete a tag definition (and its assignment rows).
    pub async fn delete_tag(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM tags WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Tag {} not found", id)));
        }

        self.increment_revision().await?;
        Ok(())
    }

    /// Record that a lead carries a tag.
    pub async fn link_tag(&self, lead_id: &LeadId, tag_id: &str) -> Result<(), AppError> {
        let lead_id = persisted_id(lead_id)?;
        sqlx::query(
            "INSERT OR IGNORE INTO lead_tags (lead_id, tag_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(lead_id)
        .bind(tag_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove the assignment row for a tag name.
    pub async fn unlink_tag(
        &self,
        lead_id: &LeadId,
        scope: &str,
        name: &str,
    ) -> Result<(), AppError> {
        let lead_id = persisted_id(lead_id)?;
        sqlx::query(
            r#"DELETE FROM lead_tags
               WHERE lead_id = ? AND tag_id IN (SELECT id FROM tags WHERE scope = ? AND name = ?)"#,
        )
        .bind(lead_id)
        .bind(scope)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Rename a tag on every lead in the scope. Returns the number of leads changed.
    pub async fn cascade_rename_tag(
        &self,
        scope: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<u64, AppError> {
        self.rewrite_scope_tags(scope, |lead| lead.rename_tag(old_name, new_name))
            .await
    }

    /// Strip a tag from every lead in the scope. Returns the number of leads changed.
    pub async fn cascade_remove_tag(&self, scope: &str, name: &str) -> Result<u64, AppError> {
        sqlx::query(
            r#"DELETE FROM lead_tags
               WHERE tag_id IN (SELECT id FROM tags WHERE scope = ? AND name = ?)"#,
        )
        .bind(scope)
        .bind(name)
        .execute(&self.pool)
        .await?;

        self.rewrite_scope_tags(scope, |lead| lead.remove_tag(name))
            .await
    }

    /// Apply `rewrite` to the tag set of every lead in `scope` inside one
    /// transaction, publishing an update for each lead it changed.
    ///
    /// An organization scope also covers the personal leads of its members,
    /// since those appear on the members' boards next to the shared ones.
    async fn rewrite_scope_tags<F>(&self, scope: &str, rewrite: F) -> Result<u64, AppError>
    where
        F: Fn(&mut Lead) -> bool,
    {
        let sql = format!(
            r#"SELECT {} FROM leads
               WHERE organization_id = ?
                  OR (organization_id IS NULL AND (
                        user_id = ?
                        OR user_id IN (SELECT user_id FROM leads WHERE organization_id = ?)
                        OR user_id IN (SELECT created_by FROM tags WHERE scope = ?)))"#,
            LEAD_COLUMNS
        );
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(&sql)
            .bind(scope)
            .bind(scope)
            .bind(scope)
            .bind(scope)
            .fetch_all(&mut *tx)
            .await?;

        let mut changed = Vec::new();
        for row in &rows {
            let old = lead_from_row(row);
            let mut new = old.clone();
            if !rewrite(&mut new) {
                continue;
            }
            new.updated_at = now;

            sqlx::query("UPDATE leads SET tags = ?, updated_at = ? WHERE id = ?")
                .bind(tags_json(&new.tags))
                .bind(now)
                .bind(new.id.to_string())
                .execute(&mut *tx)
                .await?;

            changed.push((old, new));
        }

        if changed.is_empty() {
            return Ok(0);
        }

        let revision = bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::debug!("Tag cascade in scope {} touched {} leads", scope, changed.len());

        let affected = changed.len() as u64;
        for (old, new) in changed {
            self.publish(ChangeEvent::update(Some(old), new, revision));
        }
        Ok(affected)
    }

    // ==================== QUOTA OPERATIONS ====================

    /// Read a user's quota, creating it with the default allowance if missing.
    pub async fn get_quota(&self, user_id: &str) -> Result<Quota, AppError> {
        sqlx::query(
            r#"INSERT OR IGNORE INTO quotas (user_id, search_remaining, enrich_remaining, tier)
               VALUES (?, ?, ?, ?)"#,
        )
        .bind(user_id)
        .bind(self.default_search_quota)
        .bind(self.default_enrich_quota)
        .bind(Tier::Free.as_str())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT search_remaining, enrich_remaining, tier FROM quotas WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(quota_from_row(&row))
    }

    /// Overwrite a user's quota.
    pub async fn set_quota(&self, user_id: &str, quota: &Quota) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO quotas (user_id, search_remaining, enrich_remaining, tier)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(user_id) DO UPDATE SET search_remaining = excluded.search_remaining,
                   enrich_remaining = excluded.enrich_remaining, tier = excluded.tier"#,
        )
        .bind(user_id)
        .bind(quota.search_remaining)
        .bind(quota.enrich_remaining)
        .bind(quota.tier.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically deduct one credit for `action`.
    ///
    /// The guarded UPDATE is the only place credits are spent; concurrent
    /// sessions racing on the last credit see exactly one success.
    pub async fn consume_quota(
        &self,
        user_id: &str,
        action: QuotaAction,
    ) -> Result<Quota, AppError> {
        let quota = self.get_quota(user_id).await?;
        if quota.tier.is_unlimited() {
            return Ok(quota);
        }

        let column = match action {
            QuotaAction::Search => "search_remaining",
            QuotaAction::Enrich => "enrich_remaining",
        };
        let sql = format!(
            "UPDATE quotas SET {col} = {col} - 1 WHERE user_id = ? AND {col} > 0",
            col = column
        );
        let result = sqlx::query(&sql).bind(user_id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(AppError::QuotaExhausted(action));
        }

        self.get_quota(user_id).await
    }
}

#[async_trait]
impl PipelineStore for Repository {
    async fn list_leads(&self, owner: &Owner) -> Result<Vec<Lead>, AppError> {
        Repository::list_leads(self, owner).await
    }

    async fn get_lead(&self, id: &LeadId) -> Result<Option<Lead>, AppError> {
        match id.as_stored() {
            Some(id) => Repository::get_lead(self, id).await,
            None => Ok(None),
        }
    }

    async fn find_lead_by_place_id(
        &self,
        owner: &Owner,
        place_id: &str,
    ) -> Result<Option<Lead>, AppError> {
        Repository::find_lead_by_place_id(self, owner, place_id).await
    }

    async fn insert_lead(&self, lead: &Lead) -> Result<Lead, AppError> {
        Repository::insert_lead(self, lead).await
    }

    async fn upsert_leads(&self, leads: &[Lead]) -> Result<Vec<Lead>, AppError> {
        Repository::upsert_leads(self, leads).await
    }

    async fn update_lead(&self, lead: &Lead) -> Result<Lead, AppError> {
        Repository::update_lead(self, lead).await
    }

    async fn delete_lead(&self, id: &LeadId) -> Result<(), AppError> {
        Repository::delete_lead(self, id).await
    }

    async fn list_tags(&self, scope: &str) -> Result<Vec<TagRow>, AppError> {
        Repository::list_tags(self, scope).await
    }

    async fn insert_tag(&self, tag: &TagRow) -> Result<TagRow, AppError> {
        Repository::insert_tag(self, tag).await
    }

    async fn update_tag(&self, id: &str, changes: &UpdateTagRequest) -> Result<TagRow, AppError> {
        Repository::update_tag(self, id, changes).await
    }

    async fn delete_tag(&self, id: &str) -> Result<(), AppError> {
        Repository::delete_tag(self, id).await
    }

    async fn link_tag(&self, lead_id: &LeadId, tag_id: &str) -> Result<(), AppError> {
        Repository::link_tag(self, lead_id, tag_id).await
    }

    async fn unlink_tag(
        &self,
        lead_id: &LeadId,
        scope: &str,
        name: &str,
    ) -> Result<(), AppError> {
        Repository::unlink_tag(self, lead_id, scope, name).await
    }

    async fn cascade_rename_tag(
        &self,
        scope: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<u64, AppError> {
        Repository::cascade_rename_tag(self, scope, old_name, new_name).await
    }

    async fn cascade_remove_tag(&self, scope: &str, name: &str) -> Result<u64, AppError> {
        Repository::cascade_remove_tag(self, scope, name).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        Repository::subscribe(self)
    }
}

// Helper functions for row conversion

fn new_lead_id() -> LeadId {
    LeadId::stored(uuid::Uuid::new_v4().to_string())
}

fn persisted_id(id: &LeadId) -> Result<&str, AppError> {
    id.as_stored()
        .ok_or_else(|| AppError::NotFound(format!("Lead {} has not been persisted yet", id)))
}

async fn bump_revision(tx: &mut Transaction<'_, Sqlite>) -> Result<i64, AppError> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
        .bind(&now)
        .execute(&mut **tx)
        .await?;
    let row = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
        .fetch_one(&mut **tx)
        .await?;
    Ok(row.get("revision_id"))
}

fn bind_lead<'q>(
    sql: &'q str,
    lead: &'q Lead,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    sqlx::query(sql)
        .bind(lead.id.to_string())
        .bind(&lead.user_id)
        .bind(&lead.organization_id)
        .bind(&lead.name)
        .bind(&lead.category)
        .bind(lead.source.as_str())
        .bind(lead.status.as_str())
        .bind(lead.order_index)
        .bind(tags_json(&lead.tags))
        .bind(&lead.place_id)
        .bind(&lead.address)
        .bind(&lead.city)
        .bind(&lead.phone)
        .bind(&lead.email)
        .bind(&lead.website)
        .bind(lead.rating)
        .bind(&lead.notes)
        .bind(&lead.contact_name)
        .bind(&lead.linkedin_url)
        .bind(&lead.instagram_url)
        .bind(&lead.registry_id)
        .bind(lead.added_at)
        .bind(lead.closed_at)
        .bind(lead.updated_at)
}

fn lead_from_row(row: &SqliteRow) -> Lead {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let source: String = row.get("source");
    let tags: String = row.get("tags");

    Lead {
        id: LeadId::stored(id),
        user_id: row.get("user_id"),
        organization_id: row.get("organization_id"),
        name: row.get("name"),
        category: row.get("category"),
        source: source.parse().unwrap_or_default(),
        status: status.parse().unwrap_or(LeadStatus::New),
        order_index: row.get("order_index"),
        tags: parse_json_array(&tags),
        place_id: row.get("place_id"),
        address: row.get("address"),
        city: row.get("city"),
        phone: row.get("phone"),
        email: row.get("email"),
        website: row.get("website"),
        rating: row.get("rating"),
        notes: row.get("notes"),
        contact_name: row.get("contact_name"),
        linkedin_url: row.get("linkedin_url"),
        instagram_url: row.get("instagram_url"),
        registry_id: row.get("registry_id"),
        added_at: row.get("added_at"),
        closed_at: row.get("closed_at"),
        updated_at: row.get("updated_at"),
        is_saved: false,
    }
}

fn tag_from_row(row: &SqliteRow) -> TagRow {
    TagRow {
        id: row.get("id"),
        name: row.get("name"),
        color: row.get("color"),
        scope: row.get("scope"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
    }
}

fn quota_from_row(row: &SqliteRow) -> Quota {
    let tier: String = row.get("tier");
    Quota {
        search_remaining: row.get("search_remaining"),
        enrich_remaining: row.get("enrich_remaining"),
        tier: Tier::from_str(&tier).unwrap_or_default(),
    }
}

fn tags_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

fn parse_json_array(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::models::{ChangeKind, NewLead};
    use tempfile::TempDir;

    async fn repo() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("test.sqlite"))
            .await
            .unwrap();
        (Repository::new(pool).with_default_quota(2, 1), temp_dir)
    }

    fn owner() -> Owner {
        Owner::new("user-1", Some("org-1"))
    }

    fn new_lead(name: &str, place_id: Option<&str>, tags: &[&str]) -> Lead {
        let request = NewLead {
            name: name.to_string(),
            place_id: place_id.map(str::to_string),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        };
        Lead::from_request(&request, &owner(), LeadId::temporary(), Utc::now())
    }

    #[tokio::test]
    async fn test_insert_assigns_store_id_and_publishes() {
        let (repo, _dir) = repo().await;
        let mut feed = repo.subscribe();

        let stored = repo.insert_lead(&new_lead("Acme", None, &[])).await.unwrap();
        assert!(!stored.id.is_temporary());

        let event = feed.recv().await.unwrap();
        assert_eq!(event.event_type, ChangeKind::Insert);
        assert_eq!(event.lead_id(), Some(&stored.id));
        assert_eq!(event.revision, repo.get_revision_id().await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_place_id_reports_existing_id() {
        let (repo, _dir) = repo().await;
        let first = repo
            .insert_lead(&new_lead("Acme", Some("place-1"), &[]))
            .await
            .unwrap();

        let err = repo
            .insert_lead(&new_lead("Acme again", Some("place-1"), &[]))
            .await
            .unwrap_err();

        match err {
            AppError::Duplicate { existing_id, .. } => {
                assert_eq!(existing_id, Some(first.id.to_string()));
            }
            other => panic!("expected duplicate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upsert_batch_bumps_revision_once() {
        let (repo, _dir) = repo().await;
        let a = repo.insert_lead(&new_lead("A", None, &[])).await.unwrap();
        let b = repo.insert_lead(&new_lead("B", None, &[])).await.unwrap();
        let before = repo.get_revision_id().await.unwrap();

        let mut a2 = a.clone();
        a2.order_index = 20_000;
        let mut b2 = b.clone();
        b2.order_index = 10_000;
        let written = repo.upsert_leads(&[a2, b2]).await.unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(repo.get_revision_id().await.unwrap(), before + 1);
        let reloaded = repo.get_lead(a.id.as_stored().unwrap()).await.unwrap().unwrap();
        assert_eq!(reloaded.order_index, 20_000);
    }

    #[tokio::test]
    async fn test_cascade_rename_and_remove() {
        let (repo, _dir) = repo().await;
        let a = repo.insert_lead(&new_lead("A", None, &["Old", "VIP"])).await.unwrap();
        let b = repo.insert_lead(&new_lead("B", None, &["Old"])).await.unwrap();
        repo.insert_lead(&new_lead("C", None, &["Other"])).await.unwrap();

        let renamed = repo.cascade_rename_tag("org-1", "Old", "New").await.unwrap();
        assert_eq!(renamed, 2);
        let a = repo.get_lead(a.id.as_stored().unwrap()).await.unwrap().unwrap();
        assert_eq!(a.tags, vec!["New".to_string(), "VIP".to_string()]);

        let removed = repo.cascade_remove_tag("org-1", "New").await.unwrap();
        assert_eq!(removed, 2);
        let b = repo.get_lead(b.id.as_stored().unwrap()).await.unwrap().unwrap();
        assert!(b.tags.is_empty());
    }

    #[tokio::test]
    async fn test_cascade_reaches_member_personal_leads() {
        let (repo, _dir) = repo().await;
        let member = owner();
        let mut personal = new_lead("Personal", None, &["VIP", "Hot"]);
        personal.organization_id = None;
        let personal = repo.insert_lead(&personal).await.unwrap();
        let shared = repo.insert_lead(&new_lead("Shared", None, &["VIP"])).await.unwrap();

        let mut outsider = new_lead("Outsider", None, &["VIP"]);
        outsider.user_id = "user-2".to_string();
        outsider.organization_id = None;
        let outsider = repo.insert_lead(&outsider).await.unwrap();

        let visible = repo.list_leads(&member).await.unwrap();
        assert!(visible.iter().any(|l| l.id == personal.id));

        let removed = repo.cascade_remove_tag("org-1", "VIP").await.unwrap();
        assert_eq!(removed, 2);

        let visible = repo.list_leads(&member).await.unwrap();
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|l| !l.has_tag("VIP")));
        let personal = visible.iter().find(|l| l.id == personal.id).unwrap();
        assert_eq!(personal.tags, vec!["Hot".to_string()]);
        assert!(visible.iter().any(|l| l.id == shared.id));

        let outsider = repo
            .get_lead(outsider.id.as_stored().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outsider.tags, vec!["VIP".to_string()]);
    }

    #[tokio::test]
    async fn test_consume_quota_until_exhausted() {
        let (repo, _dir) = repo().await;

        let quota = repo.consume_quota("user-1", QuotaAction::Search).await.unwrap();
        assert_eq!(quota.search_remaining, 1);
        repo.consume_quota("user-1", QuotaAction::Search).await.unwrap();

        let err = repo
            .consume_quota("user-1", QuotaAction::Search)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QuotaExhausted(QuotaAction::Search)));

        // Enrichment credits are independent
        let quota = repo.consume_quota("user-1", QuotaAction::Enrich).await.unwrap();
        assert_eq!(quota.enrich_remaining, 0);
    }

    #[tokio::test]
    async fn test_unlimited_tier_never_deducts() {
        let (repo, _dir) = repo().await;
        let unlimited = Quota {
            search_remaining: 0,
            enrich_remaining: 0,
            tier: Tier::Unlimited,
        };
        repo.set_quota("user-1", &unlimited).await.unwrap();

        let quota = repo.consume_quota("user-1", QuotaAction::Search).await.unwrap();
        assert_eq!(quota, unlimited);
    }
}
