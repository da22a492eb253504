//! Periodic health checking of registered translation services.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::errors::TranslationError;
use crate::core::models::ServiceType;
use crate::core::registry::{HealthStatus, ServiceRegistry};

/// Configuration for service health checking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Whether the background monitor runs
    pub enabled: bool,
    /// Seconds between health check cycles
    pub interval_seconds: u64,
    /// Timeout for each health check
    pub timeout_seconds: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            timeout_seconds: 10,
        }
    }
}

/// Background service that refreshes service health in the registry.
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ServiceRegistry>, config: HealthCheckConfig) -> Self {
        Self { registry, config }
    }

    /// Check every registered service once and record the results.
    pub async fn check_all_services(&self) -> Vec<(ServiceType, HealthStatus)> {
        let providers = self.registry.providers().await;
        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let mut results = Vec::with_capacity(providers.len());

        for (service_type, provider) in providers {
            let start = Instant::now();
            let outcome = match tokio::time::timeout(timeout, provider.health_check()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TranslationError::TimeoutError {
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };

            let status = match outcome {
                Ok(()) => HealthStatus::Healthy {
                    response_time: start.elapsed(),
                },
                Err(e) => {
                    warn!(service = %service_type, error = %e, "Health check failed");
                    HealthStatus::Unhealthy {
                        error: e.to_string(),
                    }
                }
            };

            self.registry.set_health(&service_type, status.clone()).await;
            results.push((service_type, status));
        }

        results
    }

    /// Start the health monitor background task.
    /// Returns a JoinHandle that resolves when the monitor stops.
    pub fn start(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(self.config.interval_seconds.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            info!(
                interval_seconds = self.config.interval_seconds,
                "Health monitor started"
            );

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        info!("Health monitor shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let results = self.check_all_services().await;
                        debug!(
                            services_checked = results.len(),
                            "Health check cycle completed"
                        );
                    }
                }
            }
        })
    }
}
