//! Process-wide orchestration context and its background tasks

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::cache::TranslationCache;
use crate::core::collector::BatchCollector;
use crate::core::config::TranslatorConfig;
use crate::core::errors::Result;
use crate::core::health::HealthMonitor;
use crate::core::models::ServiceType;
use crate::core::orchestrator::TranslationOrchestrator;
use crate::core::performance::{DegradationEvent, ResourceProbe, SysinfoProbe};
use crate::core::provider::TranslationProvider;

/// Single owner of the orchestrator and the periodic tasks around it.
///
/// Constructed once at process start and handed to request handlers.
/// [`OrchestrationContext::shutdown`] cancels every background task.
pub struct OrchestrationContext {
    orchestrator: Arc<TranslationOrchestrator>,
    collector: BatchCollector,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl OrchestrationContext {
    /// Build the orchestrator, register `providers` and start background tasks
    pub async fn start(
        config: TranslatorConfig,
        providers: Vec<(ServiceType, Arc<dyn TranslationProvider>)>,
    ) -> Result<Self> {
        Self::start_with_probe(config, providers, Arc::new(SysinfoProbe::new())).await
    }

    /// Like [`OrchestrationContext::start`] with a custom resource probe
    pub async fn start_with_probe(
        config: TranslatorConfig,
        providers: Vec<(ServiceType, Arc<dyn TranslationProvider>)>,
        probe: Arc<dyn ResourceProbe>,
    ) -> Result<Self> {
        let orchestrator = Arc::new(TranslationOrchestrator::new(&config)?);
        for (service_type, provider) in providers {
            orchestrator.register_service(service_type, provider).await;
        }

        let cancel_token = CancellationToken::new();
        let mut tasks = Vec::new();

        if config.health.enabled {
            let monitor = HealthMonitor::new(orchestrator.registry().clone(), config.health.clone());
            tasks.push(monitor.start(cancel_token.clone()));
        }

        tasks.push(orchestrator.degradation().clone().start(
            orchestrator.tracker().clone(),
            probe,
            cancel_token.clone(),
        ));

        if config.cache.enabled {
            tasks.push(spawn_cache_maintenance(
                orchestrator.cache().clone(),
                Duration::from_secs(config.cache.sweep_interval_seconds.max(1)),
                cancel_token.clone(),
            ));
        }

        let (collector, collector_task) = BatchCollector::start(
            orchestrator.clone(),
            Duration::from_millis(config.batch.max_wait_ms),
            cancel_token.clone(),
        );
        tasks.push(collector_task);

        info!(
            services = orchestrator.registry().len().await,
            tasks = tasks.len(),
            "Orchestration context started"
        );

        Ok(Self {
            orchestrator,
            collector,
            cancel_token,
            tasks,
        })
    }

    pub fn orchestrator(&self) -> &Arc<TranslationOrchestrator> {
        &self.orchestrator
    }

    /// Collector for callers submitting requests one at a time
    pub fn collector(&self) -> &BatchCollector {
        &self.collector
    }

    /// Degradation started / ended notifications
    pub fn subscribe(&self) -> broadcast::Receiver<DegradationEvent> {
        self.orchestrator.degradation().subscribe()
    }

    /// Cancel background tasks and wait for them to finish
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Orchestration context stopped");
    }
}

/// Expiry sweep followed by an eviction policy pass on every tick
fn spawn_cache_maintenance(
    cache: Arc<TranslationCache>,
    period: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Cache maintenance shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let expired = cache.cleanup_expired_entries();
                    let tuning = cache.optimize_eviction_policy();
                    debug!(
                        expired,
                        frequency_weight = tuning.map(|t| t.frequency_weight),
                        "Cache maintenance completed"
                    );
                }
            }
        }
    })
}
