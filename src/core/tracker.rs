//! Rolling window of upstream call outcomes

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

/// Tracker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum number of outcomes retained
    pub window_size: usize,
    /// Outcomes older than this are discarded
    pub window_seconds: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_size: 200,
            window_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    at: Instant,
    success: bool,
    latency: Duration,
}

/// Aggregates over the current window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct WindowStats {
    pub sample_size: usize,
    pub failures: usize,
    pub error_rate: f64,
    pub average_response_time: Duration,
}

/// Request tracker feeding the metrics sampler
#[derive(Debug, Clone)]
pub struct RequestTracker {
    config: TrackerConfig,
    window: Arc<RwLock<VecDeque<Outcome>>>,
}

impl RequestTracker {
    /// Create a new request tracker
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            window: Arc::new(RwLock::new(VecDeque::with_capacity(config.window_size))),
            config,
        }
    }

    fn max_age(&self) -> Duration {
        Duration::from_secs(self.config.window_seconds)
    }

    /// Record one upstream call
    pub async fn record(&self, success: bool, latency: Duration) {
        let now = Instant::now();
        let mut window = self.window.write().await;
        window.push_back(Outcome {
            at: now,
            success,
            latency,
        });
        while window.len() > self.config.window_size.max(1) {
            window.pop_front();
        }
        Self::prune(&mut window, now, self.max_age());
    }

    fn prune(window: &mut VecDeque<Outcome>, now: Instant, max_age: Duration) {
        while let Some(front) = window.front() {
            if now.saturating_duration_since(front.at) > max_age {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Current window aggregates
    pub async fn snapshot(&self) -> WindowStats {
        let now = Instant::now();
        {
            let mut window = self.window.write().await;
            Self::prune(&mut window, now, self.max_age());
        }

        let window = self.window.read().await;
        let sample_size = window.len();
        if sample_size == 0 {
            return WindowStats::default();
        }

        let failures = window.iter().filter(|o| !o.success).count();
        let total_latency: Duration = window.iter().map(|o| o.latency).sum();
        let stats = WindowStats {
            sample_size,
            failures,
            error_rate: failures as f64 / sample_size as f64,
            average_response_time: total_latency / sample_size as u32,
        };
        debug!(
            sample_size,
            error_rate = stats.error_rate,
            "Request window snapshot"
        );
        stats
    }

    /// Forget all outcomes
    pub async fn reset(&self) {
        self.window.write().await.clear();
        info!("Request tracker reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_rate_and_latency() {
        let tracker = RequestTracker::new(TrackerConfig::default());
        tracker.record(true, Duration::from_millis(100)).await;
        tracker.record(true, Duration::from_millis(300)).await;
        tracker.record(false, Duration::from_millis(200)).await;
        tracker.record(false, Duration::from_millis(200)).await;

        let stats = tracker.snapshot().await;
        assert_eq!(stats.sample_size, 4);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.error_rate, 0.5);
        assert_eq!(stats.average_response_time, Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_window_is_bounded_by_count() {
        let tracker = RequestTracker::new(TrackerConfig {
            window_size: 3,
            ..Default::default()
        });
        tracker.record(false, Duration::ZERO).await;
        for _ in 0..3 {
            tracker.record(true, Duration::ZERO).await;
        }
        let stats = tracker.snapshot().await;
        assert_eq!(stats.sample_size, 3);
        assert_eq!(stats.error_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_outcomes_age_out() {
        let tracker = RequestTracker::new(TrackerConfig {
            window_seconds: 10,
            ..Default::default()
        });
        tracker.record(false, Duration::ZERO).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        tracker.record(true, Duration::ZERO).await;

        let stats = tracker.snapshot().await;
        assert_eq!(stats.sample_size, 1);
        assert_eq!(stats.failures, 0);

        tracker.reset().await;
        assert_eq!(tracker.snapshot().await.sample_size, 0);
    }
}
