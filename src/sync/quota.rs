//! Quota-gated invocation of metered provider actions.
//!
//! The gate keeps a cached copy of the user's quota. It refuses an action
//! up front when the cache says no credits are left, and otherwise lets the
//! provider enforce the real limit.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::{Enrichment, EnrichmentRequest, Quota, QuotaAction, SearchPage, SearchRequest};
use crate::providers::{EnrichmentProvider, ProgressFn, QuotaService, SearchProvider};

/// Result of a gated action. Running out of credits is an expected outcome,
/// not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome<T> {
    Completed(T),
    QuotaExhausted(QuotaAction),
}

impl<T> ActionOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            ActionOutcome::Completed(value) => Some(value),
            ActionOutcome::QuotaExhausted(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ActionOutcome<U> {
        match self {
            ActionOutcome::Completed(value) => ActionOutcome::Completed(f(value)),
            ActionOutcome::QuotaExhausted(action) => ActionOutcome::QuotaExhausted(action),
        }
    }
}

pub struct QuotaGate<Q> {
    service: Arc<Q>,
    cached: RwLock<Option<Quota>>,
}

impl<Q: QuotaService> QuotaGate<Q> {
    pub fn new(service: Arc<Q>) -> Self {
        Self {
            service,
            cached: RwLock::new(None),
        }
    }

    pub async fn cached(&self) -> Option<Quota> {
        *self.cached.read().await
    }

    /// Re-read the quota from the service.
    pub async fn refresh(&self) -> Result<Quota, AppError> {
        let quota = self.service.get_quota().await?;
        *self.cached.write().await = Some(quota);
        Ok(quota)
    }

    async fn current(&self) -> Result<Quota, AppError> {
        match self.cached().await {
            Some(quota) => Ok(quota),
            None => self.refresh().await,
        }
    }

    /// Invoke `action` unless the cached quota for it is exhausted.
    pub async fn run<T, F, Fut>(
        &self,
        action: QuotaAction,
        invoke: F,
    ) -> Result<ActionOutcome<T>, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let quota = self.current().await?;
        if !quota.allows(action) {
            tracing::info!("Skipping {}: quota exhausted", action.as_str());
            return Ok(ActionOutcome::QuotaExhausted(action));
        }

        match invoke().await {
            Ok(value) => {
                if let Err(e) = self.refresh().await {
                    tracing::warn!("Failed to refresh quota after {}: {}", action.as_str(), e);
                }
                Ok(ActionOutcome::Completed(value))
            }
            Err(AppError::QuotaExhausted(exhausted)) => {
                if let Some(quota) = self.cached.write().await.as_mut() {
                    quota.set_remaining(exhausted, 0);
                }
                Ok(ActionOutcome::QuotaExhausted(exhausted))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn search<P>(
        &self,
        provider: &P,
        request: &SearchRequest,
    ) -> Result<ActionOutcome<SearchPage>, AppError>
    where
        P: SearchProvider + ?Sized,
    {
        self.run(QuotaAction::Search, || provider.search(request)).await
    }

    pub async fn enrich<P>(
        &self,
        provider: &P,
        request: &EnrichmentRequest,
        progress: &ProgressFn<'_>,
    ) -> Result<ActionOutcome<Option<Enrichment>>, AppError>
    where
        P: EnrichmentProvider + ?Sized,
    {
        self.run(QuotaAction::Enrich, || provider.enrich(request, progress))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeQuota {
        quota: Mutex<Quota>,
    }

    impl FakeQuota {
        fn new(search: i64, tier: Tier) -> Arc<Self> {
            Arc::new(Self {
                quota: Mutex::new(Quota {
                    search_remaining: search,
                    enrich_remaining: 0,
                    tier,
                }),
            })
        }
    }

    #[async_trait]
    impl QuotaService for FakeQuota {
        async fn get_quota(&self) -> Result<Quota, AppError> {
            Ok(*self.quota.lock().unwrap())
        }
    }

    #[tokio::test]
    async fn test_exhausted_cache_skips_invocation() {
        let gate = QuotaGate::new(FakeQuota::new(0, Tier::Free));
        let calls = AtomicUsize::new(0);

        let outcome = gate
            .run(QuotaAction::Search, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(outcome, ActionOutcome::QuotaExhausted(QuotaAction::Search));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unlimited_tier_ignores_counters() {
        let gate = QuotaGate::new(FakeQuota::new(0, Tier::Unlimited));
        let outcome = gate
            .run(QuotaAction::Enrich, || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Completed(7));
    }

    #[tokio::test]
    async fn test_success_refreshes_cache() {
        let service = FakeQuota::new(2, Tier::Free);
        let gate = QuotaGate::new(service.clone());

        let outcome = gate
            .run(QuotaAction::Search, || async {
                service.quota.lock().unwrap().search_remaining -= 1;
                Ok("page")
            })
            .await
            .unwrap();

        assert_eq!(outcome.completed(), Some("page"));
        assert_eq!(gate.cached().await.map(|q| q.search_remaining), Some(1));
    }

    #[tokio::test]
    async fn test_provider_exhaustion_zeroes_cached_count() {
        let gate = QuotaGate::new(FakeQuota::new(3, Tier::Free));

        let outcome: ActionOutcome<()> = gate
            .run(QuotaAction::Search, || async {
                Err(AppError::QuotaExhausted(QuotaAction::Search))
            })
            .await
            .unwrap();

        assert_eq!(outcome, ActionOutcome::QuotaExhausted(QuotaAction::Search));
        assert_eq!(gate.cached().await.map(|q| q.search_remaining), Some(0));
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let gate = QuotaGate::new(FakeQuota::new(3, Tier::Free));
        let result: Result<ActionOutcome<()>, AppError> = gate
            .run(QuotaAction::Search, || async {
                Err(AppError::Provider("upstream timeout".to_string()))
            })
            .await;
        assert!(matches!(result, Err(AppError::Provider(_))));
    }
}
