//! The single owned pipeline state and the commands that mutate it.
//!
//! Every local change is expressed as a [`LeadCommand`]. Applying a command
//! is pure: [`Mutation::plan`] computes the next state from the current one
//! and keeps the previous state around for rollback.

use chrono::{DateTime, Utc};

use super::feed::{self, FeedOutcome};
use super::taxonomy;
use crate::models::{ChangeEvent, Lead, LeadId, LeadPatch, TagDefinition, TagRow};

/// Leads and canonical tag rows held by one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineState {
    leads: Vec<Lead>,
    tags: Vec<TagRow>,
}

/// Changes to the tag taxonomy.
#[derive(Debug, Clone)]
pub enum TagChange {
    /// Add or replace a canonical row.
    Define(TagRow),
    /// Drop the canonical row, if any, and strip the name from every lead.
    Remove { tag_id: Option<String>, name: String },
    /// Replace the canonical row and rename the tag on every lead.
    Rename { row: TagRow, from: String },
}

#[derive(Debug, Clone)]
pub enum LeadCommand {
    /// Prepend a new lead.
    Insert(Lead),
    /// Swap a locally created record for its stored counterpart.
    Reconcile { local: LeadId, stored: Lead },
    Patch {
        id: LeadId,
        patch: LeadPatch,
        at: DateTime<Utc>,
    },
    Remove(LeadId),
    /// Overwrite ranked leads by identity.
    Rerank(Vec<Lead>),
    Retag(TagChange),
}

impl LeadCommand {
    /// Re-apply this command's effect on the lead known locally as `local`
    /// to `lead`, a copy that never saw it.
    pub fn replay_onto(&self, local: &LeadId, lead: &mut Lead) {
        match self {
            LeadCommand::Patch { id, patch, at } if id == local => patch.apply_to(lead, *at),
            LeadCommand::Rerank(ranked) => {
                if let Some(ranked) = ranked.iter().find(|l| &l.id == local) {
                    lead.set_status(ranked.status, ranked.updated_at);
                    lead.order_index = ranked.order_index;
                    lead.updated_at = ranked.updated_at;
                }
            }
            LeadCommand::Retag(TagChange::Remove { name, .. }) => {
                lead.remove_tag(name);
            }
            LeadCommand::Retag(TagChange::Rename { row, from }) => {
                lead.rename_tag(from, &row.name);
            }
            _ => {}
        }
    }
}

impl PipelineState {
    pub fn new(leads: Vec<Lead>, tags: Vec<TagRow>) -> Self {
        Self { leads, tags }
    }

    pub fn leads(&self) -> &[Lead] {
        &self.leads
    }

    pub fn tags(&self) -> &[TagRow] {
        &self.tags
    }

    pub fn lead(&self, id: &LeadId) -> Option<&Lead> {
        self.leads.iter().find(|l| &l.id == id)
    }

    pub fn tag(&self, id: &str) -> Option<&TagRow> {
        self.tags.iter().find(|t| t.id == id)
    }

    /// Canonical rows unioned with names found on leads.
    pub fn taxonomy(&self) -> Vec<TagDefinition> {
        taxonomy::reconcile(&self.tags, &self.leads)
    }

    /// The state after `command`, leaving `self` untouched.
    pub fn apply(&self, command: &LeadCommand) -> PipelineState {
        let mut next = self.clone();
        next.apply_in_place(command);
        next
    }

    /// Fold one change-feed event into the lead collection.
    pub fn merge_event(&mut self, event: &ChangeEvent) -> FeedOutcome {
        feed::fold_event(&mut self.leads, event)
    }

    fn apply_in_place(&mut self, command: &LeadCommand) {
        match command {
            LeadCommand::Insert(lead) => self.leads.insert(0, lead.clone()),
            LeadCommand::Reconcile { local, stored } => {
                if let Some(existing) = self.leads.iter_mut().find(|l| l.id == stored.id) {
                    // The feed echo (or an earlier load) already delivered it
                    existing.merge_from(stored);
                    self.leads.retain(|l| &l.id != local);
                } else if let Some(slot) = self.leads.iter_mut().find(|l| &l.id == local) {
                    slot.merge_from(stored);
                }
            }
            LeadCommand::Patch { id, patch, at } => {
                if let Some(lead) = self.leads.iter_mut().find(|l| &l.id == id) {
                    patch.apply_to(lead, *at);
                }
            }
            LeadCommand::Remove(id) => self.leads.retain(|l| &l.id != id),
            LeadCommand::Rerank(ranked) => {
                for incoming in ranked {
                    if let Some(lead) = self.leads.iter_mut().find(|l| l.id == incoming.id) {
                        lead.merge_from(incoming);
                    }
                }
            }
            LeadCommand::Retag(change) => self.apply_tag_change(change),
        }
    }

    fn apply_tag_change(&mut self, change: &TagChange) {
        match change {
            TagChange::Define(row) => self.put_tag(row),
            TagChange::Remove { tag_id, name } => {
                if let Some(tag_id) = tag_id {
                    self.tags.retain(|t| &t.id != tag_id);
                }
                taxonomy::strip_tag(&mut self.leads, name);
            }
            TagChange::Rename { row, from } => {
                self.put_tag(row);
                taxonomy::rename_tag(&mut self.leads, from, &row.name);
            }
        }
    }

    fn put_tag(&mut self, row: &TagRow) {
        match self.tags.iter_mut().find(|t| t.id == row.id) {
            Some(existing) => *existing = row.clone(),
            None => self.tags.push(row.clone()),
        }
    }
}

/// A planned state transition.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub command: LeadCommand,
    pub previous: PipelineState,
    pub next: PipelineState,
}

impl Mutation {
    pub fn plan(current: &PipelineState, command: LeadCommand) -> Self {
        let next = current.apply(&command);
        Self {
            command,
            previous: current.clone(),
            next,
        }
    }

    /// The exact state before this mutation.
    pub fn rollback(&self) -> PipelineState {
        self.previous.clone()
    }

    /// Leads whose stored form changed between `previous` and `next`.
    pub fn changed_leads(&self) -> Vec<Lead> {
        self.next
            .leads
            .iter()
            .filter(|lead| self.previous.lead(&lead.id) != Some(*lead))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LeadStatus, NewLead, Owner};

    fn lead(id: LeadId, name: &str, tags: &[&str]) -> Lead {
        let request = NewLead {
            name: name.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        };
        Lead::from_request(&request, &Owner::new("u1", None), id, Utc::now())
    }

    fn row(id: &str, name: &str) -> TagRow {
        TagRow {
            id: id.to_string(),
            name: name.to_string(),
            color: "#22c55e".to_string(),
            scope: "u1".to_string(),
            created_by: "u1".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_plan_keeps_previous_for_rollback() {
        let state = PipelineState::new(vec![lead(LeadId::stored("a"), "A", &[])], vec![]);
        let mutation = Mutation::plan(&state, LeadCommand::Remove(LeadId::stored("a")));

        assert!(mutation.next.leads().is_empty());
        assert_eq!(mutation.rollback(), state);
    }

    #[test]
    fn test_reconcile_replaces_temporary_in_place() {
        let temp = LeadId::temporary();
        let state = PipelineState::new(
            vec![
                lead(temp.clone(), "New", &[]),
                lead(LeadId::stored("a"), "A", &[]),
            ],
            vec![],
        );
        let mut stored = state.leads()[0].clone();
        stored.id = LeadId::stored("b");

        let next = state.apply(&LeadCommand::Reconcile {
            local: temp,
            stored,
        });
        let ids: Vec<String> = next.leads().iter().map(|l| l.id.to_string()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_reconcile_after_echo_drops_temporary() {
        let temp = LeadId::temporary();
        let mut stored = lead(LeadId::stored("b"), "New", &[]);
        stored.status = LeadStatus::Contacted;
        let state = PipelineState::new(
            vec![stored.clone(), lead(temp.clone(), "New", &[])],
            vec![],
        );

        let next = state.apply(&LeadCommand::Reconcile {
            local: temp,
            stored,
        });
        assert_eq!(next.leads().len(), 1);
        assert_eq!(next.leads()[0].id, LeadId::stored("b"));
    }

    #[test]
    fn test_retag_rename_rewrites_rows_and_leads() {
        let state = PipelineState::new(
            vec![
                lead(LeadId::stored("a"), "A", &["Hot", "VIP"]),
                lead(LeadId::stored("b"), "B", &["Hot"]),
            ],
            vec![row("t1", "Hot")],
        );

        let mutation = Mutation::plan(
            &state,
            LeadCommand::Retag(TagChange::Rename {
                row: row("t1", "Warm"),
                from: "Hot".to_string(),
            }),
        );
        assert_eq!(mutation.next.tag("t1").map(|t| t.name.as_str()), Some("Warm"));
        assert!(mutation.next.leads().iter().all(|l| l.has_tag("Warm") && !l.has_tag("Hot")));
        assert_eq!(mutation.changed_leads().len(), 2);
    }

    #[test]
    fn test_retag_remove_drops_row_and_name() {
        let state = PipelineState::new(
            vec![
                lead(LeadId::stored("a"), "A", &["VIP"]),
                lead(LeadId::stored("b"), "B", &[]),
            ],
            vec![row("t1", "VIP")],
        );
        let mutation = Mutation::plan(
            &state,
            LeadCommand::Retag(TagChange::Remove {
                tag_id: Some("t1".to_string()),
                name: "VIP".to_string(),
            }),
        );
        assert!(mutation.next.tags().is_empty());
        assert!(mutation.next.leads().iter().all(|l| l.tags.is_empty()));

        let changed = mutation.changed_leads();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, LeadId::stored("a"));
    }

    #[test]
    fn test_replay_carries_local_edits_onto_stored_copy() {
        let temp = LeadId::temporary();
        let local = lead(temp.clone(), "New", &["Hot"]);
        let mut stored = local.clone();
        stored.id = LeadId::stored("b");

        let mut ranked = local.clone();
        ranked.status = LeadStatus::Qualified;
        ranked.order_index = 5_000;
        let commands = vec![
            LeadCommand::Patch {
                id: temp.clone(),
                patch: LeadPatch::status(LeadStatus::Closed),
                at: Utc::now(),
            },
            LeadCommand::Patch {
                id: LeadId::stored("other"),
                patch: LeadPatch::tags(vec![]),
                at: Utc::now(),
            },
            LeadCommand::Rerank(vec![ranked]),
            LeadCommand::Retag(TagChange::Rename {
                row: row("t1", "Warm"),
                from: "Hot".to_string(),
            }),
        ];
        for command in &commands {
            command.replay_onto(&temp, &mut stored);
        }

        assert_eq!(stored.id, LeadId::stored("b"));
        assert_eq!(stored.status, LeadStatus::Qualified);
        assert!(stored.closed_at.is_none());
        assert_eq!(stored.order_index, 5_000);
        assert_eq!(stored.tags, vec!["Warm".to_string()]);
    }
}
