//! External provider seams: lead search, enrichment and the quota service.
//!
//! Providers are black boxes to the engine. The metered wrappers here deduct
//! from the quota table before delegating, so quota enforcement happens
//! inside the provider call the way a hosted search function would do it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{
    Enrichment, EnrichmentProgress, EnrichmentRequest, Quota, QuotaAction, SearchPage,
    SearchRequest,
};

/// Progress callback handed to the enrichment provider.
pub type ProgressFn<'a> = dyn Fn(EnrichmentProgress) + Send + Sync + 'a;

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, AppError>;
}

#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Look up contact details. `Ok(None)` means nothing was found.
    async fn enrich(
        &self,
        request: &EnrichmentRequest,
        progress: &ProgressFn<'_>,
    ) -> Result<Option<Enrichment>, AppError>;
}

#[async_trait]
pub trait QuotaService: Send + Sync {
    async fn get_quota(&self) -> Result<Quota, AppError>;
}

/// Flag candidates whose dedup key the caller already has.
pub fn mark_known(page: &mut SearchPage, known_place_ids: &[String]) {
    for lead in &mut page.leads {
        lead.is_saved = lead
            .place_id
            .as_ref()
            .is_some_and(|key| known_place_ids.iter().any(|k| k == key));
    }
}

/// Quota service backed by the `quotas` table.
#[derive(Clone)]
pub struct StoreQuota {
    repo: Arc<Repository>,
    user_id: String,
}

impl StoreQuota {
    pub fn new(repo: Arc<Repository>, user_id: impl Into<String>) -> Self {
        Self {
            repo,
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl QuotaService for StoreQuota {
    async fn get_quota(&self) -> Result<Quota, AppError> {
        self.repo.get_quota(&self.user_id).await
    }
}

/// Search provider that charges one search credit per request.
pub struct MeteredSearch<P> {
    repo: Arc<Repository>,
    user_id: String,
    inner: P,
}

impl<P: SearchProvider> MeteredSearch<P> {
    pub fn new(repo: Arc<Repository>, user_id: impl Into<String>, inner: P) -> Self {
        Self {
            repo,
            user_id: user_id.into(),
            inner,
        }
    }
}

#[async_trait]
impl<P: SearchProvider> SearchProvider for MeteredSearch<P> {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, AppError> {
        self.repo
            .consume_quota(&self.user_id, QuotaAction::Search)
            .await?;
        let mut page = self.inner.search(request).await?;
        mark_known(&mut page, &request.known_place_ids);
        Ok(page)
    }
}

/// Enrichment provider that charges one enrichment credit per request.
pub struct MeteredEnrichment<P> {
    repo: Arc<Repository>,
    user_id: String,
    inner: P,
}

impl<P: EnrichmentProvider> MeteredEnrichment<P> {
    pub fn new(repo: Arc<Repository>, user_id: impl Into<String>, inner: P) -> Self {
        Self {
            repo,
            user_id: user_id.into(),
            inner,
        }
    }
}

#[async_trait]
impl<P: EnrichmentProvider> EnrichmentProvider for MeteredEnrichment<P> {
    async fn enrich(
        &self,
        request: &EnrichmentRequest,
        progress: &ProgressFn<'_>,
    ) -> Result<Option<Enrichment>, AppError> {
        self.repo
            .consume_quota(&self.user_id, QuotaAction::Enrich)
            .await?;
        self.inner.enrich(request, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::models::{Lead, LeadId, NewLead, Owner};
    use chrono::Utc;
    use tempfile::TempDir;

    struct FixedSearch;

    #[async_trait]
    impl SearchProvider for FixedSearch {
        async fn search(&self, request: &SearchRequest) -> Result<SearchPage, AppError> {
            let leads = ["p1", "p2"]
                .iter()
                .map(|place| {
                    let request = NewLead {
                        name: format!("{} {}", request.query, place),
                        place_id: Some(place.to_string()),
                        ..Default::default()
                    };
                    Lead::from_request(
                        &request,
                        &Owner::new("u1", None),
                        LeadId::temporary(),
                        Utc::now(),
                    )
                })
                .collect();
            Ok(SearchPage {
                leads,
                next_page: None,
            })
        }
    }

    #[tokio::test]
    async fn test_metered_search_deducts_and_marks_known() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("test.db")).await.unwrap();
        let repo = Arc::new(Repository::new(pool).with_default_quota(1, 0));
        let search = MeteredSearch::new(repo.clone(), "u1", FixedSearch);

        let request = SearchRequest {
            query: "Bakery".to_string(),
            location: "Lisbon".to_string(),
            page: 0,
            known_place_ids: vec!["p2".to_string()],
        };
        let page = search.search(&request).await.unwrap();
        let saved: Vec<bool> = page.leads.iter().map(|l| l.is_saved).collect();
        assert_eq!(saved, vec![false, true]);

        let quota = StoreQuota::new(repo.clone(), "u1").get_quota().await.unwrap();
        assert_eq!(quota.search_remaining, 0);

        let err = search.search(&request).await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExhausted(QuotaAction::Search)));
    }
}
