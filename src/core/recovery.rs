//! Error classification and automatic recovery

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::core::errors::{Result, TranslationError};
use crate::core::performance::DegradationController;

/// Category of an upstream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    Network,
    ApiLimit,
    Authentication,
    ServiceUnavailable,
    InvalidInput,
    Unknown,
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClassification::Network => "network",
            ErrorClassification::ApiLimit => "api_limit",
            ErrorClassification::Authentication => "authentication",
            ErrorClassification::ServiceUnavailable => "service_unavailable",
            ErrorClassification::InvalidInput => "invalid_input",
            ErrorClassification::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// What to do about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryAction {
    Retry,
    Fallback,
    Degrade,
    Fail,
}

/// Action with its base delay and retry allowance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryDecision {
    pub action: RecoveryAction,
    pub delay: Duration,
    pub max_retries: u32,
}

/// Fixed policy table
pub fn decide(classification: ErrorClassification) -> RecoveryDecision {
    let (action, delay_ms, max_retries) = match classification {
        ErrorClassification::Network => (RecoveryAction::Retry, 2_000, 3),
        ErrorClassification::ApiLimit => (RecoveryAction::Degrade, 60_000, 1),
        ErrorClassification::Authentication => (RecoveryAction::Fallback, 0, 0),
        ErrorClassification::ServiceUnavailable => (RecoveryAction::Fallback, 5_000, 2),
        ErrorClassification::InvalidInput => (RecoveryAction::Fail, 0, 0),
        ErrorClassification::Unknown => (RecoveryAction::Retry, 1_000, 2),
    };
    RecoveryDecision {
        action,
        delay: Duration::from_millis(delay_ms),
        max_retries,
    }
}

// Checked in order; the first match wins.
const MESSAGE_RULES: &[(ErrorClassification, &str)] = &[
    (
        ErrorClassification::ApiLimit,
        r"rate.?limit|quota|too many requests|throttl|limit exceeded",
    ),
    (
        ErrorClassification::Authentication,
        r"unauthori[sz]ed|forbidden|api.?key|authenticat|invalid token|permission denied",
    ),
    (
        ErrorClassification::InvalidInput,
        r"invalid (input|request|parameter)|malformed|bad request|too long|unsupported language",
    ),
    (
        ErrorClassification::ServiceUnavailable,
        r"unavailable|overloaded|bad gateway|maintenance",
    ),
    (
        ErrorClassification::Network,
        r"network|connection|connect|timed? ?out|dns|socket|unreachable|reset by peer",
    ),
];

/// Maps errors to an [`ErrorClassification`]
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<(ErrorClassification, Regex)>,
}

impl ErrorClassifier {
    pub fn new() -> Result<Self> {
        let rules = MESSAGE_RULES
            .iter()
            .map(|(classification, pattern)| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (*classification, re))
                    .map_err(|e| TranslationError::ConfigError {
                        message: format!("invalid classifier pattern: {}", e),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Classify by error kind first, then by message content
    pub fn classify(&self, error: &TranslationError) -> ErrorClassification {
        use TranslationError::*;

        match error {
            NetworkError { .. } | TimeoutError { .. } => ErrorClassification::Network,
            RateLimitError { .. } => ErrorClassification::ApiLimit,
            AuthenticationError { .. } => ErrorClassification::Authentication,
            ServiceUnavailable { .. } | NoServiceAvailable => {
                ErrorClassification::ServiceUnavailable
            }
            InvalidInput { .. } | EmptyInput => ErrorClassification::InvalidInput,
            ApiError { status, message } => match status {
                401 | 403 => ErrorClassification::Authentication,
                429 => ErrorClassification::ApiLimit,
                400 | 413 | 422 => ErrorClassification::InvalidInput,
                500..=599 => ErrorClassification::ServiceUnavailable,
                _ => self.classify_message(message),
            },
            other => self.classify_message(&other.to_string()),
        }
    }

    fn classify_message(&self, message: &str) -> ErrorClassification {
        self.rules
            .iter()
            .find(|(_, re)| re.is_match(message))
            .map(|(classification, _)| *classification)
            .unwrap_or(ErrorClassification::Unknown)
    }
}

/// Recovery tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Upper bound on attempts per recovery, regardless of policy
    pub max_recovery_attempts: u32,
    /// Cap for exponential backoff
    pub max_backoff_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_recovery_attempts: 3,
            max_backoff_ms: 120_000,
        }
    }
}

/// Recovery counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryStats {
    pub attempted: u64,
    pub recovered: u64,
    pub failed: u64,
    pub by_classification: HashMap<ErrorClassification, u64>,
}

pub struct RecoveryController {
    classifier: ErrorClassifier,
    config: RecoveryConfig,
    degradation: Arc<DegradationController>,
    stats: RwLock<RecoveryStats>,
}

impl RecoveryController {
    pub fn new(config: RecoveryConfig, degradation: Arc<DegradationController>) -> Result<Self> {
        Ok(Self {
            classifier: ErrorClassifier::new()?,
            config,
            degradation,
            stats: RwLock::new(RecoveryStats::default()),
        })
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn classify(&self, error: &TranslationError) -> ErrorClassification {
        self.classifier.classify(error)
    }

    pub fn decide(&self, error: &TranslationError) -> RecoveryDecision {
        decide(self.classify(error))
    }

    /// Number of attempts allowed for `decision`.
    ///
    /// The policy's retry count is authoritative but never below one, and the
    /// caller's `max_attempts` caps it.
    pub fn retry_budget(&self, decision: &RecoveryDecision, max_attempts: u32) -> u32 {
        decision.max_retries.max(1).min(max_attempts)
    }

    /// Delay before attempt `attempt` (zero-based)
    pub fn backoff(&self, decision: &RecoveryDecision, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        decision
            .delay
            .saturating_mul(factor)
            .min(Duration::from_millis(self.config.max_backoff_ms))
    }

    pub async fn stats(&self) -> RecoveryStats {
        self.stats.read().await.clone()
    }

    /// Try to recover from `error` by re-running `operation`.
    ///
    /// `fail` decisions return the original error without calling
    /// `operation`. `degrade` decisions put the system into degraded mode
    /// before retrying. Retries stop early when a new error is an input
    /// error.
    pub async fn attempt_automatic_recovery<T, F, Fut>(
        &self,
        error: &TranslationError,
        max_attempts: u32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let classification = self.classify(error);
        let decision = decide(classification);
        {
            let mut stats = self.stats.write().await;
            stats.attempted += 1;
            *stats.by_classification.entry(classification).or_insert(0) += 1;
        }

        match decision.action {
            RecoveryAction::Fail => {
                info!(classification = %classification, error = %error, "Error is not recoverable");
                self.stats.write().await.failed += 1;
                return Err(error.clone());
            }
            RecoveryAction::Degrade => {
                self.degradation
                    .activate_degradation_mode(format!("{}: {}", classification, error))
                    .await;
            }
            RecoveryAction::Retry | RecoveryAction::Fallback => {}
        }

        let budget = self.retry_budget(&decision, max_attempts);
        let mut last_error = error.clone();

        for attempt in 0..budget {
            let delay = self.backoff(&decision, attempt);
            if !delay.is_zero() {
                debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Waiting before recovery attempt"
                );
                tokio::time::sleep(delay).await;
            }

            match operation().await {
                Ok(value) => {
                    info!(
                        classification = %classification,
                        attempt = attempt + 1,
                        "Recovered from upstream error"
                    );
                    self.stats.write().await.recovered += 1;
                    return Ok(value);
                }
                Err(e) => {
                    let next = self.classify(&e);
                    warn!(
                        attempt = attempt + 1,
                        budget,
                        classification = %next,
                        error = %e,
                        "Recovery attempt failed"
                    );
                    last_error = e;
                    if next == ErrorClassification::InvalidInput {
                        break;
                    }
                }
            }
        }

        self.stats.write().await.failed += 1;
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::performance::{BatchLimits, PerformanceConfig};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn controller() -> (RecoveryController, Arc<DegradationController>) {
        let degradation = Arc::new(DegradationController::new(
            PerformanceConfig::default(),
            BatchLimits {
                max_batch_size: 10,
                max_concurrency: 4,
            },
        ));
        let recovery = RecoveryController::new(RecoveryConfig::default(), degradation.clone())
            .unwrap();
        (recovery, degradation)
    }

    #[test]
    fn test_policy_table() {
        let cases = [
            (ErrorClassification::Network, RecoveryAction::Retry, 2_000, 3),
            (ErrorClassification::ApiLimit, RecoveryAction::Degrade, 60_000, 1),
            (ErrorClassification::Authentication, RecoveryAction::Fallback, 0, 0),
            (ErrorClassification::ServiceUnavailable, RecoveryAction::Fallback, 5_000, 2),
            (ErrorClassification::InvalidInput, RecoveryAction::Fail, 0, 0),
            (ErrorClassification::Unknown, RecoveryAction::Retry, 1_000, 2),
        ];
        for (classification, action, delay_ms, retries) in cases {
            let decision = decide(classification);
            assert_eq!(decision.action, action, "{}", classification);
            assert_eq!(decision.delay, Duration::from_millis(delay_ms));
            assert_eq!(decision.max_retries, retries);
        }
    }

    #[test]
    fn test_classify_by_kind() {
        let classifier = ErrorClassifier::new().unwrap();
        let cases = [
            (
                TranslationError::NetworkError {
                    message: "reset".into(),
                },
                ErrorClassification::Network,
            ),
            (
                TranslationError::TimeoutError { timeout_ms: 100 },
                ErrorClassification::Network,
            ),
            (
                TranslationError::RateLimitError {
                    retry_after: Some(3),
                },
                ErrorClassification::ApiLimit,
            ),
            (
                TranslationError::AuthenticationError {
                    message: "bad key".into(),
                },
                ErrorClassification::Authentication,
            ),
            (
                TranslationError::ApiError {
                    status: 503,
                    message: "".into(),
                },
                ErrorClassification::ServiceUnavailable,
            ),
            (
                TranslationError::ApiError {
                    status: 422,
                    message: "".into(),
                },
                ErrorClassification::InvalidInput,
            ),
            (TranslationError::EmptyInput, ErrorClassification::InvalidInput),
        ];
        for (error, expected) in cases {
            assert_eq!(classifier.classify(&error), expected, "{}", error);
        }
    }

    #[test]
    fn test_classify_by_message() {
        let classifier = ErrorClassifier::new().unwrap();
        let internal = |m: &str| TranslationError::InternalError(m.to_string());

        assert_eq!(
            classifier.classify(&internal("Quota exceeded for today")),
            ErrorClassification::ApiLimit
        );
        assert_eq!(
            classifier.classify(&internal("API key missing")),
            ErrorClassification::Authentication
        );
        assert_eq!(
            classifier.classify(&internal("text too long")),
            ErrorClassification::InvalidInput
        );
        assert_eq!(
            classifier.classify(&internal("model overloaded")),
            ErrorClassification::ServiceUnavailable
        );
        assert_eq!(
            classifier.classify(&internal("connection refused")),
            ErrorClassification::Network
        );
        assert_eq!(
            classifier.classify(&internal("something odd")),
            ErrorClassification::Unknown
        );
    }

    #[test]
    fn test_budget_and_backoff() {
        let (recovery, _) = controller();
        let network = decide(ErrorClassification::Network);
        assert_eq!(recovery.retry_budget(&network, 5), 3);
        assert_eq!(recovery.retry_budget(&network, 2), 2);

        // Fallback with zero retries still gets one attempt
        let auth = decide(ErrorClassification::Authentication);
        assert_eq!(recovery.retry_budget(&auth, 3), 1);

        assert_eq!(recovery.backoff(&network, 0), Duration::from_secs(2));
        assert_eq!(recovery.backoff(&network, 2), Duration::from_secs(8));
        let limit = decide(ErrorClassification::ApiLimit);
        assert_eq!(recovery.backoff(&limit, 3), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_recovers_with_backoff() {
        let (recovery, _) = controller();
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result = recovery
            .attempt_automatic_recovery(
                &TranslationError::NetworkError {
                    message: "reset".into(),
                },
                3,
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(TranslationError::NetworkError {
                                message: "still down".into(),
                            })
                        } else {
                            Ok("ok")
                        }
                    }
                },
            )
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(6));

        let stats = recovery.stats().await;
        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.recovered, 1);
    }

    #[tokio::test]
    async fn test_invalid_input_never_retries() {
        let (recovery, _) = controller();
        let calls = AtomicU32::new(0);
        let error = TranslationError::InvalidInput {
            message: "bad".into(),
        };

        let result: Result<()> = recovery
            .attempt_automatic_recovery(&error, 3, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert_eq!(result.unwrap_err(), error);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_limit_activates_degradation() {
        let (recovery, degradation) = controller();
        let result = recovery
            .attempt_automatic_recovery(
                &TranslationError::RateLimitError { retry_after: None },
                3,
                || async { Ok(1) },
            )
            .await;

        assert_eq!(result.unwrap(), 1);
        assert!(degradation.is_degraded().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_at_budget() {
        let (recovery, _) = controller();
        let calls = AtomicU32::new(0);
        let result: Result<()> = recovery
            .attempt_automatic_recovery(
                &TranslationError::InternalError("weird".into()),
                5,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TranslationError::InternalError("weird".into())) }
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(recovery.stats().await.failed, 1);
    }
}
