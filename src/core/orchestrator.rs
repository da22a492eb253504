//! Orchestration façade: cache, service selection, batching and recovery

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::batcher::{BatchStats, RequestBatcher};
use crate::core::cache::{normalize, Fingerprint, TranslationCache};
use crate::core::config::TranslatorConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::{BatchStrategy, Priority, ServiceType, TranslationRequest};
use crate::core::performance::{DegradationController, PerformanceReport};
use crate::core::provider::TranslationProvider;
use crate::core::recovery::RecoveryController;
use crate::core::registry::ServiceRegistry;
use crate::core::tracker::RequestTracker;

/// Entry point used by callers.
///
/// Owns the cache; every other component is shared with the background
/// tasks started by [`crate::core::context::OrchestrationContext`].
pub struct TranslationOrchestrator {
    strategy: BatchStrategy,
    cache: Arc<TranslationCache>,
    registry: Arc<ServiceRegistry>,
    tracker: RequestTracker,
    degradation: Arc<DegradationController>,
    recovery: Arc<RecoveryController>,
    batcher: RequestBatcher,
}

impl TranslationOrchestrator {
    /// Build all components from `config`. No services are registered yet.
    pub fn new(config: &TranslatorConfig) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(TranslationCache::new(config.cache.clone()));
        let registry = Arc::new(ServiceRegistry::new());
        let tracker = RequestTracker::new(config.tracker.clone());
        let degradation = Arc::new(DegradationController::new(
            config.performance.clone(),
            config.batch.limits(),
        ));
        let recovery = Arc::new(RecoveryController::new(
            config.recovery.clone(),
            degradation.clone(),
        )?);
        let batcher = RequestBatcher::new(
            config.batch.clone(),
            registry.clone(),
            tracker.clone(),
            recovery.clone(),
            degradation.clone(),
            Duration::from_millis(config.timeout_ms),
        );

        Ok(Self {
            strategy: config.batch.strategy,
            cache,
            registry,
            tracker,
            degradation,
            recovery,
            batcher,
        })
    }

    /// Register a backend; idempotent per service type
    pub async fn register_service(
        &self,
        service_type: ServiceType,
        provider: Arc<dyn TranslationProvider>,
    ) -> bool {
        self.registry.register_service(service_type, provider).await
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    pub fn degradation(&self) -> &Arc<DegradationController> {
        &self.degradation
    }

    pub async fn batch_stats(&self) -> BatchStats {
        self.batcher.stats().await
    }

    /// Translate a single text
    pub async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String> {
        if normalize(text).is_empty() {
            return Err(TranslationError::EmptyInput);
        }
        let request = TranslationRequest::new(text, from, to);
        self.translate_batch(&[request], Priority::Normal)
            .await?
            .pop()
            .ok_or_else(|| TranslationError::InternalError("empty batch result".to_string()))
    }

    /// Translate a batch, failing with the first error in request order
    pub async fn translate_batch(
        &self,
        requests: &[TranslationRequest],
        priority: Priority,
    ) -> Result<Vec<String>> {
        self.translate_batch_detailed(requests, priority)
            .await
            .into_iter()
            .collect()
    }

    /// Translate a batch and return one result per request, in order.
    ///
    /// Cache hits short-circuit. Identical misses share one upstream unit.
    /// Successful translations are written back to the cache.
    pub async fn translate_batch_detailed(
        &self,
        requests: &[TranslationRequest],
        priority: Priority,
    ) -> Vec<Result<String>> {
        let mut results: Vec<Option<Result<String>>> = vec![None; requests.len()];
        let mut pending: Vec<TranslationRequest> = Vec::new();
        let mut fanout: Vec<Vec<usize>> = Vec::new();
        let mut in_flight: HashMap<Fingerprint, usize> = HashMap::new();
        let mut cache_hits = 0usize;

        for (index, request) in requests.iter().enumerate() {
            if normalize(request.text()).is_empty() {
                results[index] = Some(Err(TranslationError::EmptyInput));
                continue;
            }

            let key = Fingerprint::compute(request.text(), request.source_lang(), request.target_lang());
            if let Some(&slot) = in_flight.get(&key) {
                fanout[slot].push(index);
                continue;
            }

            if let Some(hit) = self
                .cache
                .get(request.text(), request.source_lang(), request.target_lang())
            {
                cache_hits += 1;
                results[index] = Some(Ok(hit));
                continue;
            }

            in_flight.insert(key, pending.len());
            pending.push(request.clone());
            fanout.push(vec![index]);
        }

        if !pending.is_empty() {
            match self.registry.select_service(&pending[0]).await {
                None => {
                    for &index in fanout.iter().flatten() {
                        results[index] = Some(Err(TranslationError::NoServiceAvailable));
                    }
                }
                Some(service) => {
                    debug!(service = %service, upstream = pending.len(), "Dispatching cache misses");
                    let outcomes = self
                        .batcher
                        .process_batch(service, &pending, self.strategy, priority)
                        .await;

                    for ((request, indices), outcome) in pending.iter().zip(&fanout).zip(outcomes) {
                        if let Ok(translation) = &outcome {
                            self.cache.put(
                                request.text(),
                                request.source_lang(),
                                request.target_lang(),
                                translation.clone(),
                            );
                        }
                        for &index in indices {
                            results[index] = Some(outcome.clone());
                        }
                    }
                }
            }
        }

        info!(
            requests = requests.len(),
            cache_hits,
            upstream = pending.len(),
            "Batch translated"
        );

        results
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(TranslationError::InternalError(
                        "request produced no result".to_string(),
                    ))
                })
            })
            .collect()
    }

    /// Level, batch stats, system metrics, cache, recovery and services
    pub async fn performance_report(&self) -> PerformanceReport {
        let mut report = self
            .degradation
            .get_performance_report(self.batcher.stats().await)
            .await;
        report.cache = Some(self.cache.stats());
        report.recovery = Some(self.recovery.stats().await);
        report.services = self.registry.descriptors().await;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::batcher::join_segments;
    use crate::core::performance::PerformanceLevel;
    use crate::core::test_support::MockProvider;

    async fn orchestrator_with(provider: Arc<MockProvider>) -> TranslationOrchestrator {
        let orchestrator = TranslationOrchestrator::new(&TranslatorConfig::default()).unwrap();
        orchestrator
            .register_service(ServiceType::Qianwen, provider)
            .await;
        orchestrator
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let provider = Arc::new(MockProvider::new("q").with_translation("Hello", "你好"));
        let orchestrator = orchestrator_with(provider.clone()).await;

        assert_eq!(orchestrator.translate("Hello", "en", "zh").await.unwrap(), "你好");
        assert_eq!(orchestrator.translate("Hello", "en", "zh").await.unwrap(), "你好");
        assert_eq!(provider.calls(), 1);

        let stats = orchestrator.cache().stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_authentication_error_still_returns_every_result() {
        let provider = Arc::new(MockProvider::new("q"));
        provider.fail_merged(TranslationError::AuthenticationError {
            message: "invalid api key".into(),
        });
        let orchestrator = orchestrator_with(provider.clone()).await;

        let requests: Vec<TranslationRequest> = ["one", "two", "three"]
            .iter()
            .map(|t| TranslationRequest::new(*t, "en", "zh"))
            .collect();
        let results = orchestrator
            .translate_batch(&requests, Priority::Normal)
            .await
            .unwrap();

        assert_eq!(results, vec!["[zh]one", "[zh]two", "[zh]three"]);
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test]
    async fn test_order_preserved_across_language_pairs() {
        let provider = Arc::new(MockProvider::new("q"));
        let orchestrator = orchestrator_with(provider.clone()).await;
        orchestrator.cache().put("cached", "en", "ja", "キャッシュ");

        let requests = vec![
            TranslationRequest::new("a", "en", "zh"),
            TranslationRequest::new("b", "en", "ja"),
            TranslationRequest::new("cached", "en", "ja"),
            TranslationRequest::new("c", "en", "zh"),
            TranslationRequest::new("d", "fr", "zh"),
        ];
        let results = orchestrator
            .translate_batch(&requests, Priority::Normal)
            .await
            .unwrap();

        assert_eq!(results, vec!["[zh]a", "[ja]b", "キャッシュ", "[zh]c", "[zh]d"]);
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test]
    async fn test_order_preserved_when_merging_is_partial() {
        let provider = Arc::new(MockProvider::new("q"));
        let mut config = TranslatorConfig::default();
        config.batch.strategy = BatchStrategy::Merged;
        config.batch.max_concurrency = 1;
        let orchestrator = TranslationOrchestrator::new(&config).unwrap();
        orchestrator
            .register_service(ServiceType::Qianwen, provider.clone())
            .await;

        let requests = vec![
            TranslationRequest::new("a", "en", "zh").with_priority(Priority::Low),
            TranslationRequest::new("b", "en", "ja").with_priority(Priority::Critical),
            TranslationRequest::new("c", "en", "zh").with_priority(Priority::Normal),
            TranslationRequest::new("d", "en", "ja").with_priority(Priority::High),
            TranslationRequest::new("e", "en", "zh").with_priority(Priority::Critical),
        ];
        let results = orchestrator
            .translate_batch(&requests, Priority::Low)
            .await
            .unwrap();

        assert_eq!(results, vec!["[zh]a", "[ja]b", "[zh]c", "[ja]d", "[zh]e"]);
        // a+c and b+d merge; e is too far above a to join them
        assert_eq!(provider.calls(), 3);
        assert_eq!(
            provider.inputs(),
            vec![
                join_segments(&["b".to_string(), "d".to_string()]),
                "e".to_string(),
                join_segments(&["a".to_string(), "c".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_identical_misses_share_one_upstream_unit() {
        let provider = Arc::new(MockProvider::new("q"));
        let orchestrator = orchestrator_with(provider.clone()).await;

        let requests = vec![
            TranslationRequest::new("same", "en", "zh"),
            TranslationRequest::new("other", "en", "zh"),
            TranslationRequest::new("same", "en", "zh"),
        ];
        let results = orchestrator
            .translate_batch(&requests, Priority::High)
            .await
            .unwrap();

        assert_eq!(results, vec!["[zh]same", "[zh]other", "[zh]same"]);
        assert_eq!(provider.calls(), 1);
        let inputs = provider.inputs();
        assert_eq!(inputs[0].matches("same").count(), 1);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let provider = Arc::new(MockProvider::new("q"));
        let orchestrator = orchestrator_with(provider.clone()).await;

        assert_eq!(
            orchestrator.translate("   ", "en", "zh").await,
            Err(TranslationError::EmptyInput)
        );

        let requests = vec![
            TranslationRequest::new("ok", "en", "zh"),
            TranslationRequest::new("", "en", "zh"),
        ];
        let detailed = orchestrator
            .translate_batch_detailed(&requests, Priority::Normal)
            .await;
        assert_eq!(detailed[0], Ok("[zh]ok".to_string()));
        assert_eq!(detailed[1], Err(TranslationError::EmptyInput));

        assert_eq!(
            orchestrator.translate_batch(&requests, Priority::Normal).await,
            Err(TranslationError::EmptyInput)
        );
    }

    #[tokio::test]
    async fn test_no_registered_service() {
        let orchestrator = TranslationOrchestrator::new(&TranslatorConfig::default()).unwrap();
        assert_eq!(
            orchestrator.translate("Hello", "en", "zh").await,
            Err(TranslationError::NoServiceAvailable)
        );
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let provider = Arc::new(MockProvider::new("q"));
        provider.fail_next(
            1,
            TranslationError::InvalidInput {
                message: "rejected".into(),
            },
        );
        let orchestrator = orchestrator_with(provider.clone()).await;

        assert!(orchestrator.translate("Hello", "en", "zh").await.is_err());
        assert!(orchestrator.cache().is_empty());
        assert_eq!(orchestrator.translate("Hello", "en", "zh").await.unwrap(), "[zh]Hello");
    }

    #[tokio::test]
    async fn test_performance_report() {
        let provider = Arc::new(MockProvider::new("q"));
        let orchestrator = orchestrator_with(provider).await;
        orchestrator.translate("Hello", "en", "zh").await.unwrap();

        let report = orchestrator.performance_report().await;
        assert_eq!(report.level, PerformanceLevel::Optimal);
        assert_eq!(report.batch.requests_processed, 1);
        assert_eq!(report.cache.as_ref().unwrap().entries, 1);
        assert_eq!(report.services.len(), 1);
        assert_eq!(report.services[0].metrics.total_requests, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["level"], "optimal");
    }
}
