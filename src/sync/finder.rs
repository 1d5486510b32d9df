//! Lead finder: paged provider search accumulated into one result list.

use std::collections::HashSet;

use super::engine::PipelineEngine;
use super::quota::{ActionOutcome, QuotaGate};
use super::state::PipelineState;
use crate::errors::AppError;
use crate::models::{
    EnrichmentRequest, Lead, LeadId, LeadSource, NewLead, SearchPage, SearchRequest,
};
use crate::providers::{EnrichmentProvider, ProgressFn, QuotaService, SearchProvider};
use crate::store::PipelineStore;

/// Search results collected across pages of one `(niche, location)` query.
#[derive(Debug, Clone, Default)]
pub struct FinderSession {
    query: Option<(String, String)>,
    results: Vec<Lead>,
    next_page: Option<u32>,
}

fn query_key(niche: &str, location: &str) -> (String, String) {
    (niche.trim().to_lowercase(), location.trim().to_lowercase())
}

/// Dedup keys of everything already on the board.
pub fn known_keys(state: &PipelineState) -> Vec<String> {
    state
        .leads()
        .iter()
        .filter_map(|l| l.place_id.clone())
        .collect()
}

impl FinderSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> &[Lead] {
        &self.results
    }

    pub fn next_page(&self) -> Option<u32> {
        self.next_page
    }

    pub fn is_same_query(&self, niche: &str, location: &str) -> bool {
        self.query.as_ref() == Some(&query_key(niche, location))
    }

    /// Take in one page of results.
    ///
    /// A page for the query already being shown is appended, skipping
    /// candidates whose dedup key is already listed. A page for a new query
    /// replaces everything. Returns how many candidates were added.
    pub fn absorb(&mut self, niche: &str, location: &str, page: SearchPage) -> usize {
        if !self.is_same_query(niche, location) {
            self.query = Some(query_key(niche, location));
            self.results.clear();
        }
        self.next_page = page.next_page;

        let mut seen: HashSet<String> = self
            .results
            .iter()
            .filter_map(|l| l.place_id.clone())
            .collect();
        let before = self.results.len();
        for candidate in page.leads {
            let duplicate = candidate
                .place_id
                .as_ref()
                .is_some_and(|key| !seen.insert(key.clone()));
            if !duplicate {
                self.results.push(candidate);
            }
        }
        self.results.len() - before
    }

    /// Recompute the saved flag of every candidate against the board.
    pub fn refresh_saved(&mut self, state: &PipelineState) {
        let known: HashSet<String> = known_keys(state).into_iter().collect();
        for candidate in &mut self.results {
            candidate.is_saved = candidate
                .place_id
                .as_ref()
                .is_some_and(|key| known.contains(key));
        }
    }

    pub fn mark_saved(&mut self, place_id: &str) {
        for candidate in &mut self.results {
            if candidate.place_id.as_deref() == Some(place_id) {
                candidate.is_saved = true;
            }
        }
    }
}

impl<S: PipelineStore> PipelineEngine<S> {
    /// Fetch one page of finder results through the quota gate. Returns the
    /// number of new candidates added to `finder`.
    pub async fn search_leads<Q, P>(
        &self,
        gate: &QuotaGate<Q>,
        provider: &P,
        finder: &mut FinderSession,
        niche: &str,
        location: &str,
        page: u32,
    ) -> Result<ActionOutcome<usize>, AppError>
    where
        Q: QuotaService,
        P: SearchProvider + ?Sized,
    {
        if niche.trim().is_empty() || location.trim().is_empty() {
            return Err(AppError::Validation(
                "Search needs both a niche and a location".to_string(),
            ));
        }

        let request = SearchRequest {
            query: niche.trim().to_string(),
            location: location.trim().to_string(),
            page,
            known_place_ids: known_keys(&self.snapshot().await),
        };
        let outcome = gate.search(provider, &request).await?;

        Ok(match outcome {
            ActionOutcome::Completed(results) => {
                let added = finder.absorb(niche, location, results);
                finder.refresh_saved(&self.snapshot().await);
                tracing::info!("Finder added {} candidates for {} in {}", added, niche, location);
                ActionOutcome::Completed(added)
            }
            ActionOutcome::QuotaExhausted(action) => ActionOutcome::QuotaExhausted(action),
        })
    }

    /// Add a finder candidate to the board.
    pub async fn save_candidate(
        &self,
        finder: &mut FinderSession,
        candidate: &Lead,
    ) -> Result<Lead, AppError> {
        let mut request = NewLead::from(candidate);
        request.source = LeadSource::AiFinder;
        let lead = self.create_lead(request).await?;
        if let Some(key) = &candidate.place_id {
            finder.mark_saved(key);
        }
        Ok(lead)
    }

    /// Look up contact details for a lead and merge whatever was found.
    ///
    /// `Completed(None)` means the provider found nothing new.
    pub async fn enrich_lead<Q, P>(
        &self,
        gate: &QuotaGate<Q>,
        provider: &P,
        id: &LeadId,
        progress: &ProgressFn<'_>,
    ) -> Result<ActionOutcome<Option<Lead>>, AppError>
    where
        Q: QuotaService,
        P: EnrichmentProvider + ?Sized,
    {
        let lead = self
            .lead(id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", id)))?;
        let request = EnrichmentRequest::from(&lead);

        match gate.enrich(provider, &request, progress).await? {
            ActionOutcome::Completed(Some(found)) if !found.is_empty() => {
                let updated = self.update_lead(id, found.into_patch()).await?;
                Ok(ActionOutcome::Completed(Some(updated)))
            }
            ActionOutcome::Completed(_) => Ok(ActionOutcome::Completed(None)),
            ActionOutcome::QuotaExhausted(action) => Ok(ActionOutcome::QuotaExhausted(action)),
        }
    }
}
