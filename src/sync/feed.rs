//! Change-feed merging.
//!
//! Events from the store are folded into the local lead collection in
//! delivery order. A subscriber that falls behind the broadcast buffer
//! reloads the whole pipeline instead of trying to replay.

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::engine::PipelineEngine;
use crate::models::{ChangeEvent, ChangeKind, Lead};
use crate::store::PipelineStore;

/// What folding one event did to the local collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    Inserted,
    Updated,
    Removed,
    Ignored,
}

/// Apply one event.
///
/// Inserts of a known identity and updates of an unknown one are ignored,
/// so the echo of a local write never duplicates a record.
pub fn fold_event(leads: &mut Vec<Lead>, event: &ChangeEvent) -> FeedOutcome {
    match event.event_type {
        ChangeKind::Insert => {
            let Some(new) = &event.new else {
                return FeedOutcome::Ignored;
            };
            if leads.iter().any(|l| l.id == new.id) {
                return FeedOutcome::Ignored;
            }
            leads.insert(0, new.clone());
            FeedOutcome::Inserted
        }
        ChangeKind::Update => {
            let Some(new) = &event.new else {
                return FeedOutcome::Ignored;
            };
            match leads.iter_mut().find(|l| l.id == new.id) {
                Some(existing) => {
                    existing.merge_from(new);
                    FeedOutcome::Updated
                }
                None => FeedOutcome::Ignored,
            }
        }
        ChangeKind::Delete => {
            let Some(id) = event.lead_id() else {
                return FeedOutcome::Ignored;
            };
            let before = leads.len();
            leads.retain(|l| &l.id != id);
            if leads.len() == before {
                FeedOutcome::Ignored
            } else {
                FeedOutcome::Removed
            }
        }
    }
}

/// A running change-feed consumer. Dropping it stops the consumer.
pub struct FeedSubscription {
    handle: JoinHandle<()>,
}

impl FeedSubscription {
    /// Subscribe to the engine's store and fold every event into its state.
    ///
    /// The receiver is created before this returns, so calling
    /// [`PipelineEngine::load`] afterwards cannot miss events in between.
    pub fn start<S: PipelineStore>(engine: PipelineEngine<S>) -> Self {
        let mut rx = engine.store().subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let outcome = engine.apply_change(&event).await;
                        tracing::debug!(
                            "Feed {:?} for {:?} at revision {}: {:?}",
                            event.event_type,
                            event.lead_id().map(|id| id.to_string()),
                            event.revision,
                            outcome
                        );
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Change feed lagged by {} events, reloading", skipped);
                        if let Err(e) = engine.load().await {
                            tracing::warn!("Reload after feed lag failed: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("Change feed closed");
                        break;
                    }
                }
            }
        });
        Self { handle }
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop consuming. Events after this point are not applied.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
