//! In-memory store used by the engine tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use super::{feed_channel, PipelineStore};
use crate::errors::AppError;
use crate::models::{ChangeEvent, Lead, LeadId, Owner, TagRow, UpdateTagRequest};

/// Operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Insert,
    Upsert,
    Update,
    Delete,
    InsertTag,
}

#[derive(Default)]
struct Failures {
    insert: AtomicBool,
    upsert: AtomicBool,
    update: AtomicBool,
    delete: AtomicBool,
    insert_tag: AtomicBool,
}

impl Failures {
    fn flag(&self, op: Op) -> &AtomicBool {
        match op {
            Op::Insert => &self.insert,
            Op::Upsert => &self.upsert,
            Op::Update => &self.update,
            Op::Delete => &self.delete,
            Op::InsertTag => &self.insert_tag,
        }
    }
}

pub struct MemoryStore {
    leads: Mutex<Vec<Lead>>,
    tags: Mutex<Vec<TagRow>>,
    calls: Mutex<Vec<String>>,
    failures: Failures,
    feed: broadcast::Sender<ChangeEvent>,
    revision: Mutex<i64>,
    next_id: Mutex<u64>,
    insert_gate: AsyncMutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            leads: Mutex::new(Vec::new()),
            tags: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            failures: Failures::default(),
            feed: feed_channel(),
            revision: Mutex::new(0),
            next_id: Mutex::new(0),
            insert_gate: AsyncMutex::new(()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_leads(leads: Vec<Lead>) -> Self {
        let store = Self::new();
        *store.leads.lock().unwrap() = leads;
        store
    }

    pub fn with_tags(self, tags: Vec<TagRow>) -> Self {
        *self.tags.lock().unwrap() = tags;
        self
    }

    pub fn fail(&self, op: Op, fail: bool) {
        self.failures.flag(op).store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn leads(&self) -> Vec<Lead> {
        self.leads.lock().unwrap().clone()
    }

    pub fn tags(&self) -> Vec<TagRow> {
        self.tags.lock().unwrap().clone()
    }

    /// Hold every `insert_lead` call until the guard is dropped.
    pub async fn hold_inserts(&self) -> AsyncMutexGuard<'_, ()> {
        self.insert_gate.lock().await
    }

    /// Publish an event as if another session had written it.
    pub fn emit(&self, event: ChangeEvent) {
        let _ = self.feed.send(event);
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, op: Op) -> Result<(), AppError> {
        if self.failures.flag(op).load(Ordering::SeqCst) {
            return Err(AppError::Database(format!("injected {:?} failure", op)));
        }
        Ok(())
    }

    fn bump(&self) -> i64 {
        let mut revision = self.revision.lock().unwrap();
        *revision += 1;
        *revision
    }

    fn assign_id(&self, id: &LeadId) -> LeadId {
        if !id.is_temporary() {
            return id.clone();
        }
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        LeadId::stored(format!("lead-{}", next))
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn list_leads(&self, owner: &Owner) -> Result<Vec<Lead>, AppError> {
        Ok(self
            .leads()
            .into_iter()
            .filter(|l| l.visible_to(owner))
            .collect())
    }

    async fn get_lead(&self, id: &LeadId) -> Result<Option<Lead>, AppError> {
        Ok(self.leads().into_iter().find(|l| &l.id == id))
    }

    async fn find_lead_by_place_id(
        &self,
        owner: &Owner,
        place_id: &str,
    ) -> Result<Option<Lead>, AppError> {
        self.record(format!("find_lead_by_place_id:{}", place_id));
        Ok(self
            .leads()
            .into_iter()
            .find(|l| l.user_id == owner.user_id && l.place_id.as_deref() == Some(place_id)))
    }

    async fn insert_lead(&self, lead: &Lead) -> Result<Lead, AppError> {
        let _gate = self.insert_gate.lock().await;
        self.record(format!("insert_lead:{}", lead.name));
        self.check(Op::Insert)?;
        let mut stored = lead.clone();
        stored.id = self.assign_id(&lead.id);
        stored.is_saved = false;
        self.leads.lock().unwrap().insert(0, stored.clone());
        let revision = self.bump();
        self.emit(ChangeEvent::insert(stored.clone(), revision));
        Ok(stored)
    }

    async fn upsert_leads(&self, leads: &[Lead]) -> Result<Vec<Lead>, AppError> {
        self.record(format!("upsert_leads:{}", leads.len()));
        self.check(Op::Upsert)?;
        let mut written = Vec::new();
        let mut stored_leads = self.leads.lock().unwrap();
        for lead in leads {
            let mut stored = lead.clone();
            stored.id = self.assign_id(&lead.id);
            match stored_leads.iter_mut().find(|l| l.id == stored.id) {
                Some(existing) => *existing = stored.clone(),
                None => stored_leads.push(stored.clone()),
            }
            written.push(stored);
        }
        Ok(written)
    }

    async fn update_lead(&self, lead: &Lead) -> Result<Lead, AppError> {
        self.record(format!("update_lead:{}", lead.id));
        self.check(Op::Update)?;
        let mut stored = lead.clone();
        stored.updated_at = Utc::now();
        let mut leads = self.leads.lock().unwrap();
        match leads.iter_mut().find(|l| l.id == lead.id) {
            Some(existing) => {
                *existing = stored.clone();
                Ok(stored)
            }
            None => Err(AppError::NotFound(format!("Lead {} not found", lead.id))),
        }
    }

    async fn delete_lead(&self, id: &LeadId) -> Result<(), AppError> {
        self.record(format!("delete_lead:{}", id));
        self.check(Op::Delete)?;
        self.leads.lock().unwrap().retain(|l| &l.id != id);
        Ok(())
    }

    async fn list_tags(&self, scope: &str) -> Result<Vec<TagRow>, AppError> {
        Ok(self
            .tags()
            .into_iter()
            .filter(|t| t.scope == scope)
            .collect())
    }

    async fn insert_tag(&self, tag: &TagRow) -> Result<TagRow, AppError> {
        self.record(format!("insert_tag:{}", tag.name));
        self.check(Op::InsertTag)?;
        self.tags.lock().unwrap().push(tag.clone());
        Ok(tag.clone())
    }

    async fn update_tag(&self, id: &str, changes: &UpdateTagRequest) -> Result<TagRow, AppError> {
        self.record(format!("update_tag:{}", id));
        let mut tags = self.tags.lock().unwrap();
        let tag = tags
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Tag {} not found", id)))?;
        if let Some(name) = &changes.name {
            tag.name = name.clone();
        }
        if let Some(color) = &changes.color {
            tag.color = color.clone();
        }
        Ok(tag.clone())
    }

    async fn delete_tag(&self, id: &str) -> Result<(), AppError> {
        self.record(format!("delete_tag:{}", id));
        self.tags.lock().unwrap().retain(|t| t.id != id);
        Ok(())
    }

    async fn link_tag(&self, lead_id: &LeadId, tag_id: &str) -> Result<(), AppError> {
        self.record(format!("link_tag:{}:{}", lead_id, tag_id));
        Ok(())
    }

    async fn unlink_tag(
        &self,
        lead_id: &LeadId,
        _scope: &str,
        name: &str,
    ) -> Result<(), AppError> {
        self.record(format!("unlink_tag:{}:{}", lead_id, name));
        Ok(())
    }

    async fn cascade_rename_tag(
        &self,
        scope: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<u64, AppError> {
        self.record(format!("cascade_rename_tag:{}:{}:{}", scope, old_name, new_name));
        let mut affected = 0;
        for lead in self.leads.lock().unwrap().iter_mut() {
            if lead.rename_tag(old_name, new_name) {
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn cascade_remove_tag(&self, scope: &str, name: &str) -> Result<u64, AppError> {
        self.record(format!("cascade_remove_tag:{}:{}", scope, name));
        let mut affected = 0;
        for lead in self.leads.lock().unwrap().iter_mut() {
            if lead.remove_tag(name) {
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }
}
