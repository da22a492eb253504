//! Service registry: known translation backends, their health and rolling metrics

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{ServiceType, TranslationRequest};
use crate::core::provider::TranslationProvider;
use crate::core::tracker::RequestTracker;

/// Backend health as last observed by the health monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealthStatus {
    Unknown,
    Healthy { response_time: Duration },
    Unhealthy { error: String },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy { .. })
    }
}

/// Cumulative per-service call metrics
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ServiceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: Duration,
}

impl ServiceMetrics {
    fn record(&mut self, success: bool, latency: Duration) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        // Incremental mean
        let n = self.total_requests as f64;
        let avg = self.average_response_time.as_secs_f64();
        let next = avg + (latency.as_secs_f64() - avg) / n;
        self.average_response_time = Duration::from_secs_f64(next.max(0.0));
    }
}

/// Public view of a registered backend
#[derive(Debug, Clone, Serialize)]
pub struct ServiceDescriptor {
    pub service_type: ServiceType,
    pub name: String,
    pub priority: u8,
    pub status: HealthStatus,
    pub metrics: ServiceMetrics,
    pub last_checked: Option<DateTime<Utc>>,
}

impl ServiceDescriptor {
    /// Latency used to break ties between equally ranked services
    fn effective_latency(&self) -> Duration {
        if self.metrics.total_requests > 0 {
            self.metrics.average_response_time
        } else {
            match &self.status {
                HealthStatus::Healthy { response_time } => *response_time,
                _ => Duration::MAX,
            }
        }
    }
}

struct ServiceEntry {
    provider: Arc<dyn TranslationProvider>,
    descriptor: ServiceDescriptor,
}

/// Registry of translation backends
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<ServiceType, ServiceEntry>>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend. Returns false if `service_type` was already registered.
    pub async fn register_service(
        &self,
        service_type: ServiceType,
        provider: Arc<dyn TranslationProvider>,
    ) -> bool {
        let mut services = self.services.write().await;
        if services.contains_key(&service_type) {
            debug!(service = %service_type, "Service already registered");
            return false;
        }

        let descriptor = ServiceDescriptor {
            service_type: service_type.clone(),
            name: provider.name().to_string(),
            priority: provider.priority(),
            status: HealthStatus::Unknown,
            metrics: ServiceMetrics::default(),
            last_checked: None,
        };
        info!(
            service = %service_type,
            name = provider.name(),
            priority = provider.priority(),
            "Registered translation service"
        );
        services.insert(service_type, ServiceEntry { provider, descriptor });
        true
    }

    /// Highest-priority healthy service, ties broken by lowest response time
    pub async fn get_best_service(&self, request: &TranslationRequest) -> Option<ServiceType> {
        self.best_healthy(None).await.map(|service| {
            debug!(request_id = %request.id(), service = %service, "Selected service");
            service
        })
    }

    /// Best healthy service other than `exclude`
    pub async fn get_alternative_service(&self, exclude: &ServiceType) -> Option<ServiceType> {
        self.best_healthy(Some(exclude)).await
    }

    async fn best_healthy(&self, exclude: Option<&ServiceType>) -> Option<ServiceType> {
        let services = self.services.read().await;
        services
            .values()
            .map(|entry| &entry.descriptor)
            .filter(|d| d.status.is_healthy())
            .filter(|d| Some(&d.service_type) != exclude)
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.effective_latency().cmp(&b.effective_latency()))
                    .then_with(|| a.service_type.cmp(&b.service_type))
            })
            .map(|d| d.service_type.clone())
    }

    /// Selection used when nothing is healthy: highest priority, unknown before unhealthy
    pub async fn default_service(&self) -> Option<ServiceType> {
        let services = self.services.read().await;
        services
            .values()
            .map(|entry| &entry.descriptor)
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| {
                        let a_unhealthy = matches!(a.status, HealthStatus::Unhealthy { .. });
                        let b_unhealthy = matches!(b.status, HealthStatus::Unhealthy { .. });
                        a_unhealthy.cmp(&b_unhealthy)
                    })
                    .then_with(|| a.service_type.cmp(&b.service_type))
            })
            .map(|d| d.service_type.clone())
    }

    /// Best healthy service, falling through to the default selection
    pub async fn select_service(&self, request: &TranslationRequest) -> Option<ServiceType> {
        if let Some(best) = self.get_best_service(request).await {
            return Some(best);
        }
        let fallback = self.default_service().await;
        if let Some(service) = &fallback {
            warn!(service = %service, "No healthy service, using default selection");
        }
        fallback
    }

    /// Provider registered for `service_type`
    pub async fn provider(&self, service_type: &ServiceType) -> Option<Arc<dyn TranslationProvider>> {
        let services = self.services.read().await;
        services.get(service_type).map(|entry| entry.provider.clone())
    }

    /// All registered providers
    pub async fn providers(&self) -> Vec<(ServiceType, Arc<dyn TranslationProvider>)> {
        let services = self.services.read().await;
        services
            .iter()
            .map(|(service_type, entry)| (service_type.clone(), entry.provider.clone()))
            .collect()
    }

    pub async fn descriptor(&self, service_type: &ServiceType) -> Option<ServiceDescriptor> {
        let services = self.services.read().await;
        services.get(service_type).map(|entry| entry.descriptor.clone())
    }

    /// Descriptors ordered by priority, highest first
    pub async fn descriptors(&self) -> Vec<ServiceDescriptor> {
        let services = self.services.read().await;
        let mut descriptors: Vec<ServiceDescriptor> =
            services.values().map(|entry| entry.descriptor.clone()).collect();
        descriptors.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.service_type.cmp(&b.service_type))
        });
        descriptors
    }

    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Update health; called only by the health monitor
    pub(crate) async fn set_health(&self, service_type: &ServiceType, status: HealthStatus) {
        let mut services = self.services.write().await;
        if let Some(entry) = services.get_mut(service_type) {
            let previous = std::mem::replace(&mut entry.descriptor.status, status);
            entry.descriptor.last_checked = Some(Utc::now());
            if previous.is_healthy() != entry.descriptor.status.is_healthy() {
                info!(
                    service = %service_type,
                    old_status = ?previous,
                    new_status = ?entry.descriptor.status,
                    "Service health changed"
                );
            }
        }
    }

    /// Record the outcome of one upstream call
    pub async fn record_request(&self, service_type: &ServiceType, success: bool, latency: Duration) {
        let mut services = self.services.write().await;
        if let Some(entry) = services.get_mut(service_type) {
            entry.descriptor.metrics.record(success, latency);
        }
    }
}

/// A selected backend bound to the bookkeeping that surrounds every call.
///
/// Each call is bounded by `timeout` and its outcome is recorded both in the
/// registry metrics and in the request tracker.
#[derive(Clone)]
pub struct ServiceHandle {
    service_type: ServiceType,
    provider: Arc<dyn TranslationProvider>,
    registry: Arc<ServiceRegistry>,
    tracker: RequestTracker,
    timeout: Duration,
}

impl ServiceHandle {
    fn new(
        service_type: ServiceType,
        provider: Arc<dyn TranslationProvider>,
        registry: Arc<ServiceRegistry>,
        tracker: RequestTracker,
        timeout: Duration,
    ) -> Self {
        Self {
            service_type,
            provider,
            registry,
            tracker,
            timeout,
        }
    }

    /// Resolve a handle for `service_type` from the registry
    pub async fn resolve(
        registry: &Arc<ServiceRegistry>,
        service_type: ServiceType,
        tracker: RequestTracker,
        timeout: Duration,
    ) -> Result<Self> {
        let provider = registry
            .provider(&service_type)
            .await
            .ok_or(TranslationError::NoServiceAvailable)?;
        Ok(Self::new(service_type, provider, registry.clone(), tracker, timeout))
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    /// Translate through the bound provider
    pub async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let start = Instant::now();
        let result = match tokio::time::timeout(
            self.timeout,
            self.provider.translate(text, source_lang, target_lang),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TranslationError::TimeoutError {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };
        let latency = start.elapsed();

        if let Err(e) = &result {
            warn!(service = %self.service_type, error = %e, "Upstream translation failed");
        }
        self.registry
            .record_request(&self.service_type, result.is_ok(), latency)
            .await;
        self.tracker.record(result.is_ok(), latency).await;
        result
    }
}
