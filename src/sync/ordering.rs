//! Column-relative ranking of leads on the board.
//!
//! `order_index` only means something inside one status partition. After a
//! move the whole destination partition is re-ranked to exact multiples of
//! [`ORDER_STEP`], so gaps are restored on every move.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::models::{Lead, LeadId, LeadStatus};

/// Distance between neighbouring ranks after a re-rank.
pub const ORDER_STEP: i64 = 10_000;

/// Canonical partition order: rank ascending, newer leads first on ties.
pub fn canonical_order(a: &Lead, b: &Lead) -> Ordering {
    a.order_index
        .cmp(&b.order_index)
        .then_with(|| b.added_at.cmp(&a.added_at))
}

pub fn sort_partition(leads: &mut [Lead]) {
    leads.sort_by(canonical_order);
}

/// Members of one status partition, in canonical order.
pub fn partition(leads: &[Lead], status: LeadStatus) -> Vec<Lead> {
    let mut members: Vec<Lead> = leads.iter().filter(|l| l.status == status).cloned().collect();
    sort_partition(&mut members);
    members
}

/// Assign `(position + 1) * ORDER_STEP` to every member.
pub fn rerank(partition: &mut [Lead]) {
    for (position, lead) in partition.iter_mut().enumerate() {
        lead.order_index = (position as i64 + 1) * ORDER_STEP;
    }
}

/// Result of planning a move: the destination partition after insertion and
/// re-ranking, moved lead included.
#[derive(Debug, Clone)]
pub struct MovePlan {
    pub lead_id: LeadId,
    pub from: LeadStatus,
    pub to: LeadStatus,
    pub index: usize,
    pub ranked: Vec<Lead>,
}

/// Plan moving lead `id` to position `to_index` of the `to` column.
///
/// Returns `None` when the lead is unknown or the move would not change
/// anything (same column, same position).
pub fn plan_move(
    leads: &[Lead],
    id: &LeadId,
    to: LeadStatus,
    to_index: usize,
    now: DateTime<Utc>,
) -> Option<MovePlan> {
    let moved = leads.iter().find(|l| &l.id == id)?;
    let from = moved.status;

    let mut members: Vec<Lead> = leads
        .iter()
        .filter(|l| l.status == to && &l.id != id)
        .cloned()
        .collect();
    sort_partition(&mut members);
    let index = to_index.min(members.len());

    if from == to {
        let current = partition(leads, to);
        if current.iter().position(|l| &l.id == id) == Some(index) {
            return None;
        }
    }

    let mut moved = moved.clone();
    moved.set_status(to, now);
    moved.updated_at = now;
    members.insert(index, moved);
    rerank(&mut members);

    Some(MovePlan {
        lead_id: id.clone(),
        from,
        to,
        index,
        ranked: members,
    })
}
