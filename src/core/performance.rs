//! Degradation controller
//!
//! Samples [`SystemMetrics`] on an interval and moves the process-wide
//! [`PerformanceLevel`] between `optimal`, `degraded` and `minimal`. Batch
//! size and concurrency are derived from the level alone, which makes this
//! the system's backpressure mechanism.
//!
//! Entry and exit thresholds differ so the level does not flap: degradation
//! starts when `error_rate > 0.3` or latency exceeds 5s, and ends only once
//! `error_rate < 0.15` and latency is under 4s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::batcher::BatchStats;
use crate::core::cache::CacheStats;
use crate::core::recovery::RecoveryStats;
use crate::core::registry::ServiceDescriptor;
use crate::core::tracker::RequestTracker;

/// Process-wide operating level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceLevel {
    Optimal,
    Degraded,
    Minimal,
}

impl fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerformanceLevel::Optimal => write!(f, "optimal"),
            PerformanceLevel::Degraded => write!(f, "degraded"),
            PerformanceLevel::Minimal => write!(f, "minimal"),
        }
    }
}

/// Degradation thresholds and sampling cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Seconds between metric samples
    pub sample_interval_seconds: u64,
    /// Enter degraded mode above this error rate
    pub degrade_error_rate: f64,
    /// Enter degraded mode above this average latency
    pub degrade_response_time_ms: u64,
    /// Leave degraded mode only below this error rate...
    pub recover_error_rate: f64,
    /// ...and below this average latency
    pub recover_response_time_ms: u64,
    /// Escalate to minimal above this error rate
    pub minimal_error_rate: f64,
    /// Escalate to minimal above this memory usage fraction
    pub minimal_memory_usage: f64,
    /// Samples with fewer requests than this are ignored
    pub min_samples: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            sample_interval_seconds: 30,
            degrade_error_rate: 0.3,
            degrade_response_time_ms: 5000,
            recover_error_rate: 0.15,
            recover_response_time_ms: 4000,
            minimal_error_rate: 0.6,
            minimal_memory_usage: 0.9,
            min_samples: 5,
        }
    }
}

/// Effective batching limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchLimits {
    pub max_batch_size: usize,
    pub max_concurrency: usize,
}

impl BatchLimits {
    /// Limits at `level` given the full-capacity limits `self`
    pub fn for_level(self, level: PerformanceLevel) -> BatchLimits {
        match level {
            PerformanceLevel::Optimal => self,
            PerformanceLevel::Degraded => BatchLimits {
                max_batch_size: (self.max_batch_size / 2).max(1),
                max_concurrency: (self.max_concurrency / 2).max(1),
            },
            PerformanceLevel::Minimal => BatchLimits {
                max_batch_size: 1,
                max_concurrency: 1,
            },
        }
    }
}

/// Current operating state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceState {
    pub level: PerformanceLevel,
    pub degradation_active: bool,
    pub reason: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl Default for PerformanceState {
    fn default() -> Self {
        Self {
            level: PerformanceLevel::Optimal,
            degradation_active: false,
            reason: None,
            since: None,
        }
    }
}

/// One metrics sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub error_rate: f64,
    pub average_response_time: Duration,
    /// Fraction of physical memory in use
    pub memory_usage: f64,
    /// Global CPU usage in percent
    pub cpu_usage: f64,
    /// Number of upstream calls behind `error_rate`
    pub sample_size: usize,
    pub sampled_at: DateTime<Utc>,
}

/// Notifications for degradation transitions
#[derive(Debug, Clone, PartialEq)]
pub enum DegradationEvent {
    Started {
        reason: String,
        level: PerformanceLevel,
    },
    LevelChanged {
        from: PerformanceLevel,
        to: PerformanceLevel,
    },
    Ended,
}

/// Snapshot for external observability
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub level: PerformanceLevel,
    pub degradation_active: bool,
    pub degradation_reason: Option<String>,
    pub limits: BatchLimits,
    pub batch: BatchStats,
    pub system: Option<SystemMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryStats>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceDescriptor>,
}

/// Memory / CPU reading
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceUsage {
    pub memory_usage: f64,
    pub cpu_usage: f64,
}

/// Source of host resource readings
pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> ResourceUsage;
}

/// `sysinfo`-backed probe
pub struct SysinfoProbe {
    system: Mutex<sysinfo::System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(sysinfo::System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&self) -> ResourceUsage {
        let Ok(mut system) = self.system.lock() else {
            return ResourceUsage::default();
        };
        system.refresh_memory();
        system.refresh_cpu();

        let total = system.total_memory();
        let memory_usage = if total == 0 {
            0.0
        } else {
            system.used_memory() as f64 / total as f64
        };
        ResourceUsage {
            memory_usage,
            cpu_usage: system.global_cpu_info().cpu_usage() as f64,
        }
    }
}

/// Owner of the process-wide performance state
pub struct DegradationController {
    config: PerformanceConfig,
    base_limits: BatchLimits,
    state: RwLock<PerformanceState>,
    latest: RwLock<Option<SystemMetrics>>,
    events: broadcast::Sender<DegradationEvent>,
}

impl DegradationController {
    pub fn new(config: PerformanceConfig, base_limits: BatchLimits) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            base_limits,
            state: RwLock::new(PerformanceState::default()),
            latest: RwLock::new(None),
            events,
        }
    }

    /// Receive degradation transitions
    pub fn subscribe(&self) -> broadcast::Receiver<DegradationEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> PerformanceState {
        self.state.read().await.clone()
    }

    pub async fn level(&self) -> PerformanceLevel {
        self.state.read().await.level
    }

    pub async fn is_degraded(&self) -> bool {
        self.state.read().await.degradation_active
    }

    /// Batch size and concurrency for the current level
    pub async fn limits(&self) -> BatchLimits {
        self.base_limits.for_level(self.level().await)
    }

    /// Enter degraded mode. Returns false if already degraded.
    pub async fn activate_degradation_mode(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let mut state = self.state.write().await;
        if state.degradation_active {
            debug!(reason = %reason, "Degradation already active");
            return false;
        }

        state.level = PerformanceLevel::Degraded;
        state.degradation_active = true;
        state.reason = Some(reason.clone());
        state.since = Some(Utc::now());
        drop(state);

        let limits = self.base_limits.for_level(PerformanceLevel::Degraded);
        warn!(
            reason = %reason,
            max_batch_size = limits.max_batch_size,
            max_concurrency = limits.max_concurrency,
            "Degradation mode activated"
        );
        let _ = self.events.send(DegradationEvent::Started {
            reason,
            level: PerformanceLevel::Degraded,
        });
        true
    }

    /// Return to optimal. Returns false if not degraded.
    pub async fn deactivate_degradation_mode(&self) -> bool {
        let mut state = self.state.write().await;
        if !state.degradation_active {
            return false;
        }
        let duration = state
            .since
            .map(|since| (Utc::now() - since).num_seconds())
            .unwrap_or_default();
        *state = PerformanceState::default();
        drop(state);

        info!(degraded_for_secs = duration, "Degradation mode deactivated");
        let _ = self.events.send(DegradationEvent::Ended);
        true
    }

    async fn change_level(&self, to: PerformanceLevel) {
        let mut state = self.state.write().await;
        let from = state.level;
        if from == to {
            return;
        }
        state.level = to;
        drop(state);

        warn!(from = %from, to = %to, "Performance level changed");
        let _ = self.events.send(DegradationEvent::LevelChanged { from, to });
    }

    fn should_degrade(&self, m: &SystemMetrics) -> bool {
        m.error_rate > self.config.degrade_error_rate
            || m.average_response_time > Duration::from_millis(self.config.degrade_response_time_ms)
    }

    fn should_recover(&self, m: &SystemMetrics) -> bool {
        m.error_rate < self.config.recover_error_rate
            && m.average_response_time < Duration::from_millis(self.config.recover_response_time_ms)
    }

    fn should_minimize(&self, m: &SystemMetrics) -> bool {
        m.error_rate > self.config.minimal_error_rate
            || m.memory_usage > self.config.minimal_memory_usage
    }

    /// Apply one sample. Returns the new level when it changed.
    pub async fn evaluate(&self, metrics: &SystemMetrics) -> Option<PerformanceLevel> {
        *self.latest.write().await = Some(metrics.clone());

        if metrics.sample_size < self.config.min_samples {
            debug!(
                sample_size = metrics.sample_size,
                "Too few requests to evaluate performance"
            );
            return None;
        }

        let before = self.level().await;
        match before {
            PerformanceLevel::Optimal => {
                if self.should_degrade(metrics) {
                    let reason = format!(
                        "error rate {:.2}, average response time {}ms",
                        metrics.error_rate,
                        metrics.average_response_time.as_millis()
                    );
                    self.activate_degradation_mode(reason).await;
                }
            }
            PerformanceLevel::Degraded | PerformanceLevel::Minimal => {
                if self.should_recover(metrics) {
                    self.deactivate_degradation_mode().await;
                } else if self.should_minimize(metrics) {
                    self.change_level(PerformanceLevel::Minimal).await;
                } else if before == PerformanceLevel::Minimal && !self.should_degrade(metrics) {
                    self.change_level(PerformanceLevel::Degraded).await;
                }
            }
        }

        let after = self.level().await;
        (after != before).then_some(after)
    }

    /// Build a metrics sample from the tracker window and the host probe
    pub async fn sample_metrics(
        &self,
        tracker: &RequestTracker,
        probe: &dyn ResourceProbe,
    ) -> SystemMetrics {
        let window = tracker.snapshot().await;
        let resources = probe.sample();
        SystemMetrics {
            error_rate: window.error_rate,
            average_response_time: window.average_response_time,
            memory_usage: resources.memory_usage,
            cpu_usage: resources.cpu_usage,
            sample_size: window.sample_size,
            sampled_at: Utc::now(),
        }
    }

    /// Snapshot of level, flag, batch stats and the latest sample
    pub async fn get_performance_report(&self, batch: BatchStats) -> PerformanceReport {
        let state = self.state().await;
        PerformanceReport {
            level: state.level,
            degradation_active: state.degradation_active,
            degradation_reason: state.reason,
            limits: self.base_limits.for_level(state.level),
            batch,
            system: self.latest.read().await.clone(),
            cache: None,
            recovery: None,
            services: Vec::new(),
        }
    }

    /// Start the metrics sampler background task.
    pub fn start(
        self: Arc<Self>,
        tracker: RequestTracker,
        probe: Arc<dyn ResourceProbe>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.config.sample_interval_seconds.max(1));
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            info!(
                interval_seconds = self.config.sample_interval_seconds,
                "Metrics sampler started"
            );

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        info!("Metrics sampler shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let metrics = self.sample_metrics(&tracker, probe.as_ref()).await;
                        if let Some(level) = self.evaluate(&metrics).await {
                            debug!(level = %level, "Performance level updated by sampler");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tracker::TrackerConfig;

    struct StaticProbe(ResourceUsage);

    impl ResourceProbe for StaticProbe {
        fn sample(&self) -> ResourceUsage {
            self.0
        }
    }

    fn base() -> BatchLimits {
        BatchLimits {
            max_batch_size: 10,
            max_concurrency: 4,
        }
    }

    fn controller() -> DegradationController {
        DegradationController::new(PerformanceConfig::default(), base())
    }

    fn sample(error_rate: f64, response_ms: u64) -> SystemMetrics {
        SystemMetrics {
            error_rate,
            average_response_time: Duration::from_millis(response_ms),
            memory_usage: 0.2,
            cpu_usage: 10.0,
            sample_size: 100,
            sampled_at: Utc::now(),
        }
    }

    #[test]
    fn test_limits_are_a_function_of_level() {
        assert_eq!(base().for_level(PerformanceLevel::Optimal), base());
        assert_eq!(
            base().for_level(PerformanceLevel::Degraded),
            BatchLimits {
                max_batch_size: 5,
                max_concurrency: 2
            }
        );
        assert_eq!(
            base().for_level(PerformanceLevel::Minimal),
            BatchLimits {
                max_batch_size: 1,
                max_concurrency: 1
            }
        );
    }

    #[tokio::test]
    async fn test_hysteresis_sequence() {
        let controller = controller();

        assert_eq!(
            controller.evaluate(&sample(0.4, 100)).await,
            Some(PerformanceLevel::Degraded)
        );
        assert_eq!(controller.evaluate(&sample(0.4, 100)).await, None);
        assert_eq!(controller.evaluate(&sample(0.2, 100)).await, None);
        assert!(controller.is_degraded().await);
        assert_eq!(
            controller.evaluate(&sample(0.1, 100)).await,
            Some(PerformanceLevel::Optimal)
        );
        assert!(!controller.is_degraded().await);
    }

    #[tokio::test]
    async fn test_latency_triggers_and_blocks_recovery() {
        let controller = controller();
        controller.evaluate(&sample(0.0, 6000)).await;
        assert_eq!(controller.level().await, PerformanceLevel::Degraded);

        // 4.5s is below the entry threshold but not below the exit threshold
        controller.evaluate(&sample(0.0, 4500)).await;
        assert_eq!(controller.level().await, PerformanceLevel::Degraded);

        controller.evaluate(&sample(0.0, 3000)).await;
        assert_eq!(controller.level().await, PerformanceLevel::Optimal);
    }

    #[tokio::test]
    async fn test_minimal_escalation_and_return() {
        let controller = controller();
        controller.evaluate(&sample(0.4, 100)).await;
        assert_eq!(
            controller.evaluate(&sample(0.8, 100)).await,
            Some(PerformanceLevel::Minimal)
        );
        assert_eq!(controller.limits().await.max_batch_size, 1);

        assert_eq!(
            controller.evaluate(&sample(0.25, 100)).await,
            Some(PerformanceLevel::Degraded)
        );
        assert_eq!(controller.limits().await.max_batch_size, 5);
    }

    #[tokio::test]
    async fn test_small_samples_ignored() {
        let controller = controller();
        let mut metrics = sample(1.0, 100);
        metrics.sample_size = 2;
        assert_eq!(controller.evaluate(&metrics).await, None);
        assert_eq!(controller.level().await, PerformanceLevel::Optimal);
    }

    #[tokio::test]
    async fn test_events_broadcast() {
        let controller = controller();
        let mut events = controller.subscribe();

        assert!(controller.activate_degradation_mode("api limit").await);
        assert!(!controller.activate_degradation_mode("again").await);
        assert_eq!(controller.limits().await.max_batch_size, 5);
        assert!(controller.deactivate_degradation_mode().await);
        assert!(!controller.deactivate_degradation_mode().await);

        assert_eq!(
            events.recv().await.unwrap(),
            DegradationEvent::Started {
                reason: "api limit".into(),
                level: PerformanceLevel::Degraded
            }
        );
        assert_eq!(events.recv().await.unwrap(), DegradationEvent::Ended);
    }

    #[tokio::test]
    async fn test_sample_metrics_and_report() {
        let controller = controller();
        let tracker = RequestTracker::new(TrackerConfig::default());
        for ok in [true, false, true, true] {
            tracker.record(ok, Duration::from_millis(100)).await;
        }
        let probe = StaticProbe(ResourceUsage {
            memory_usage: 0.5,
            cpu_usage: 42.0,
        });

        let metrics = controller.sample_metrics(&tracker, &probe).await;
        assert_eq!(metrics.error_rate, 0.25);
        assert_eq!(metrics.memory_usage, 0.5);
        assert_eq!(metrics.sample_size, 4);
        controller.evaluate(&metrics).await;

        let report = controller.get_performance_report(BatchStats::default()).await;
        assert_eq!(report.level, PerformanceLevel::Optimal);
        assert!(!report.degradation_active);
        assert_eq!(report.system.unwrap().cpu_usage, 42.0);
        assert_eq!(report.limits, base());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_degrades_under_errors() {
        let controller = Arc::new(controller());
        let tracker = RequestTracker::new(TrackerConfig::default());
        for _ in 0..10 {
            tracker.record(false, Duration::from_millis(50)).await;
        }
        let cancel = CancellationToken::new();
        let handle = controller.clone().start(
            tracker,
            Arc::new(StaticProbe(ResourceUsage::default())),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(controller.is_degraded().await);

        cancel.cancel();
        handle.await.unwrap();
    }
}
