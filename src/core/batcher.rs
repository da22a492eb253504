//! Request merging and batch execution
//!
//! Compatible requests (same language pair, priorities within one step) are
//! folded into a [`MergedRequest`] whose texts are joined with
//! [`SEGMENT_MARKER`]. The merged upstream response is split back on the same
//! marker and de-multiplexed by original index.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{BatchStrategy, LanguagePair, Priority, ServiceType, TranslationRequest};
use crate::core::performance::{BatchLimits, DegradationController};
use crate::core::recovery::{RecoveryAction, RecoveryController};
use crate::core::registry::{ServiceHandle, ServiceRegistry};
use crate::core::tracker::RequestTracker;

/// Separator placed between merged segments
pub const SEGMENT_MARKER: &str = "<|seg|>";

/// Join segments into one upstream payload
pub fn join_segments(segments: &[String]) -> String {
    segments.join(&format!("\n{}\n", SEGMENT_MARKER))
}

/// Split a merged response. Returns `None` when the segment count does not match.
pub fn split_segments(text: &str, expected: usize) -> Option<Vec<String>> {
    let segments: Vec<String> = text
        .split(SEGMENT_MARKER)
        .map(|segment| segment.trim().to_string())
        .collect();
    (segments.len() == expected).then_some(segments)
}

/// Batching configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Requests per merged unit at the optimal level
    pub max_batch_size: usize,
    /// Concurrent upstream calls at the optimal level
    pub max_concurrency: usize,
    /// How long the collector waits for a batch to fill
    pub max_wait_ms: u64,
    pub strategy: BatchStrategy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            max_concurrency: 4,
            max_wait_ms: 50,
            strategy: BatchStrategy::Adaptive,
        }
    }
}

impl BatchConfig {
    /// Full-capacity limits
    pub fn limits(&self) -> BatchLimits {
        BatchLimits {
            max_batch_size: self.max_batch_size,
            max_concurrency: self.max_concurrency,
        }
    }
}

/// Compatible requests combined into one upstream call
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRequest {
    pub pair: LanguagePair,
    /// Member texts joined with [`SEGMENT_MARKER`]
    pub text: String,
    /// Highest member priority
    pub priority: Priority,
    /// Positions of the members in the original request list
    pub indices: Vec<usize>,
}

impl MergedRequest {
    fn single(index: usize, request: &TranslationRequest) -> Self {
        Self {
            pair: request.language_pair(),
            text: request.text().to_string(),
            priority: request.priority(),
            indices: vec![index],
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Greedy single-pass grouping of compatible requests.
///
/// Each unprocessed request anchors a group and pulls in every later
/// unprocessed request with the same language pair whose priority is within
/// one step of the anchor's, up to `max_batch_size` members.
pub fn merge_compatible_requests(
    requests: &[TranslationRequest],
    max_batch_size: usize,
) -> Vec<MergedRequest> {
    let max_batch_size = max_batch_size.max(1);
    let mut taken = vec![false; requests.len()];
    let mut merged = Vec::new();

    for (i, anchor) in requests.iter().enumerate() {
        if taken[i] {
            continue;
        }
        taken[i] = true;
        let mut indices = vec![i];

        for (j, candidate) in requests.iter().enumerate().skip(i + 1) {
            if indices.len() >= max_batch_size {
                break;
            }
            if !taken[j]
                && anchor.shares_pair(candidate)
                && anchor.priority().is_adjacent(candidate.priority())
            {
                taken[j] = true;
                indices.push(j);
            }
        }

        let texts: Vec<String> = indices
            .iter()
            .map(|&k| requests[k].text().to_string())
            .collect();
        let priority = indices
            .iter()
            .map(|&k| requests[k].priority())
            .max()
            .unwrap_or_default();

        merged.push(MergedRequest {
            pair: anchor.language_pair(),
            text: join_segments(&texts),
            priority,
            indices,
        });
    }

    merged
}

/// Batch execution counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub batches_processed: u64,
    pub requests_processed: u64,
    pub merged_groups: u64,
    pub merged_requests: u64,
    pub sequential_requests: u64,
    pub fallbacks: u64,
    pub failed_requests: u64,
    pub average_batch_size: f64,
}

/// Executes batches against a selected service
pub struct RequestBatcher {
    config: BatchConfig,
    registry: Arc<ServiceRegistry>,
    tracker: RequestTracker,
    recovery: Arc<RecoveryController>,
    degradation: Arc<DegradationController>,
    request_timeout: Duration,
    stats: RwLock<BatchStats>,
}

impl RequestBatcher {
    pub fn new(
        config: BatchConfig,
        registry: Arc<ServiceRegistry>,
        tracker: RequestTracker,
        recovery: Arc<RecoveryController>,
        degradation: Arc<DegradationController>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            config,
            registry,
            tracker,
            recovery,
            degradation,
            request_timeout,
            stats: RwLock::new(BatchStats::default()),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub async fn stats(&self) -> BatchStats {
        self.stats.read().await.clone()
    }

    async fn handle(&self, service_type: ServiceType) -> Result<ServiceHandle> {
        ServiceHandle::resolve(
            &self.registry,
            service_type,
            self.tracker.clone(),
            self.request_timeout,
        )
        .await
    }

    /// Run `requests` on `service_type` and return one result per request, in order.
    ///
    /// `priority` is a floor applied to every request; it affects grouping
    /// and the order in which units are dispatched.
    pub async fn process_batch(
        &self,
        service_type: ServiceType,
        requests: &[TranslationRequest],
        strategy: BatchStrategy,
        priority: Priority,
    ) -> Vec<Result<String>> {
        if requests.is_empty() {
            return Vec::new();
        }

        let handle = match self.handle(service_type).await {
            Ok(handle) => handle,
            Err(e) => return requests.iter().map(|_| Err(e.clone())).collect(),
        };

        let requests: Vec<TranslationRequest> = requests
            .iter()
            .map(|r| r.clone().with_priority(r.priority().max(priority)))
            .collect();
        let limits = self.degradation.limits().await;

        let merge = match strategy {
            BatchStrategy::Merged => true,
            BatchStrategy::Sequential => false,
            BatchStrategy::Adaptive => requests.iter().all(|r| r.shares_pair(&requests[0])),
        };
        let mut units = if merge {
            merge_compatible_requests(&requests, limits.max_batch_size)
        } else {
            requests
                .iter()
                .enumerate()
                .map(|(i, r)| MergedRequest::single(i, r))
                .collect()
        };
        units.sort_by(|a, b| b.priority.cmp(&a.priority));

        debug!(
            service = %handle.service_type(),
            requests = requests.len(),
            units = units.len(),
            strategy = %strategy,
            max_concurrency = limits.max_concurrency,
            "Processing batch"
        );

        let semaphore = Semaphore::new(limits.max_concurrency.max(1));
        let outcomes = join_all(units.iter().map(|unit| {
            let handle = &handle;
            let requests = &requests;
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await;
                self.execute_unit(handle, unit, requests).await
            }
        }))
        .await;

        let mut slots: Vec<Option<Result<String>>> = vec![None; requests.len()];
        for (index, result) in outcomes.into_iter().flatten() {
            slots[index] = Some(result);
        }
        let results: Vec<Result<String>> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(TranslationError::InternalError(
                        "request was not dispatched".to_string(),
                    ))
                })
            })
            .collect();

        self.record_batch(&units, &results).await;
        results
    }

    async fn record_batch(&self, units: &[MergedRequest], results: &[Result<String>]) {
        let mut stats = self.stats.write().await;
        stats.batches_processed += 1;
        stats.requests_processed += results.len() as u64;
        for unit in units {
            if unit.len() > 1 {
                stats.merged_groups += 1;
                stats.merged_requests += unit.len() as u64;
            } else {
                stats.sequential_requests += 1;
            }
        }
        stats.failed_requests += results.iter().filter(|r| r.is_err()).count() as u64;
        stats.average_batch_size = stats.requests_processed as f64 / stats.batches_processed as f64;
    }

    /// One upstream call for `unit`, de-multiplexed into per-member texts
    async fn call_unit(
        &self,
        handle: &ServiceHandle,
        unit: &MergedRequest,
        requests: &[TranslationRequest],
    ) -> Result<Vec<String>> {
        let output = handle
            .translate(&unit.text, &unit.pair.source, &unit.pair.target)
            .await?;

        if unit.len() == 1 {
            return Ok(vec![output.trim().to_string()]);
        }
        if let Some(segments) = split_segments(&output, unit.len()) {
            return Ok(segments);
        }

        warn!(
            expected = unit.len(),
            "Merged response segment count mismatch, translating members one by one"
        );
        let mut translations = Vec::with_capacity(unit.len());
        for &index in &unit.indices {
            let request = &requests[index];
            let text = handle
                .translate(request.text(), request.source_lang(), request.target_lang())
                .await?;
            translations.push(text.trim().to_string());
        }
        Ok(translations)
    }

    async fn execute_unit(
        &self,
        handle: &ServiceHandle,
        unit: &MergedRequest,
        requests: &[TranslationRequest],
    ) -> Vec<(usize, Result<String>)> {
        let error = match self.call_unit(handle, unit, requests).await {
            Ok(translations) => {
                return unit.indices.iter().copied().zip(translations.into_iter().map(Ok)).collect()
            }
            Err(e) => e,
        };

        let decision = self.recovery.decide(&error);
        let max_attempts = self.recovery.config().max_recovery_attempts;

        match decision.action {
            RecoveryAction::Fail => unit
                .indices
                .iter()
                .map(|&index| (index, Err(error.clone())))
                .collect(),
            RecoveryAction::Retry | RecoveryAction::Degrade => {
                let outcome = self
                    .recovery
                    .attempt_automatic_recovery(&error, max_attempts, move || {
                        self.call_unit(handle, unit, requests)
                    })
                    .await;
                match outcome {
                    Ok(translations) => unit
                        .indices
                        .iter()
                        .copied()
                        .zip(translations.into_iter().map(Ok))
                        .collect(),
                    Err(e) => unit.indices.iter().map(|&index| (index, Err(e.clone()))).collect(),
                }
            }
            RecoveryAction::Fallback => {
                self.fallback_sequential(handle, unit, requests, &error, max_attempts)
                    .await
            }
        }
    }

    /// Translate members one by one, preferring an alternative service
    async fn fallback_sequential(
        &self,
        handle: &ServiceHandle,
        unit: &MergedRequest,
        requests: &[TranslationRequest],
        error: &TranslationError,
        max_attempts: u32,
    ) -> Vec<(usize, Result<String>)> {
        self.stats.write().await.fallbacks += 1;

        let fallback = match self
            .registry
            .get_alternative_service(handle.service_type())
            .await
        {
            Some(alternative) => match self.handle(alternative).await {
                Ok(alternative) => alternative,
                Err(_) => handle.clone(),
            },
            None => handle.clone(),
        };
        info!(
            from = %handle.service_type(),
            to = %fallback.service_type(),
            members = unit.len(),
            error = %error,
            "Falling back to sequential processing"
        );

        let slots: Mutex<Vec<Option<String>>> = Mutex::new(vec![None; unit.len()]);
        let fallback = &fallback;
        let slots_ref = &slots;
        let outcome = self
            .recovery
            .attempt_automatic_recovery(error, max_attempts, move || {
                let slots = slots_ref;
                async move {
                    let pending: Vec<usize> = {
                        let slots = slots.lock().await;
                        (0..slots.len()).filter(|&pos| slots[pos].is_none()).collect()
                    };
                    let mut last_error = None;
                    for pos in pending {
                        let request = &requests[unit.indices[pos]];
                        match fallback
                            .translate(request.text(), request.source_lang(), request.target_lang())
                            .await
                        {
                            Ok(text) => slots.lock().await[pos] = Some(text.trim().to_string()),
                            Err(e) => last_error = Some(e),
                        }
                    }
                    match last_error {
                        None => Ok(()),
                        Some(e) => Err(e),
                    }
                }
            })
            .await;

        let final_error = outcome.err().unwrap_or_else(|| error.clone());
        slots
            .into_inner()
            .into_iter()
            .zip(unit.indices.iter().copied())
            .map(|(slot, index)| match slot {
                Some(text) => (index, Ok(text)),
                None => (index, Err(final_error.clone())),
            })
            .collect()
    }
}
