//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::core::batcher::BatchConfig;
use crate::core::cache::CacheConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::health::HealthCheckConfig;
use crate::core::performance::PerformanceConfig;
use crate::core::recovery::RecoveryConfig;
use crate::core::tracker::TrackerConfig;

/// Default DashScope OpenAI-compatible endpoint
pub const DEFAULT_ENDPOINT: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Default Qianwen translation model
pub const DEFAULT_MODEL: &str = "qwen-mt-turbo";

/// Environment prefix for layered overrides, e.g. `TRANSLATOR_CACHE__MAX_ENTRIES`
const ENV_PREFIX: &str = "TRANSLATOR";

/// Configuration for the orchestrator and its Qianwen backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    pub api_key: String,
    pub api_endpoint: String,
    pub model: String,
    /// Per upstream call
    pub timeout_ms: u64,
    /// Concurrent HTTP requests per provider
    pub max_concurrent: usize,
    pub cache: CacheConfig,
    pub health: HealthCheckConfig,
    pub batch: BatchConfig,
    pub recovery: RecoveryConfig,
    pub performance: PerformanceConfig,
    pub tracker: TrackerConfig,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: 30000,
            max_concurrent: 20,
            cache: CacheConfig::default(),
            health: HealthCheckConfig::default(),
            batch: BatchConfig::default(),
            recovery: RecoveryConfig::default(),
            performance: PerformanceConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl TranslatorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let api_key = std::env::var("DASHSCOPE_API_KEY").unwrap_or_default();

        let api_endpoint =
            std::env::var("QIANWEN_ENDPOINT").unwrap_or_else(|_| defaults.api_endpoint.clone());

        let model = std::env::var("QIANWEN_MODEL").unwrap_or_else(|_| defaults.model.clone());

        let timeout_ms = std::env::var("REQUEST_TIMEOUT_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse::<u64>()?;

        let max_concurrent = std::env::var("MAX_CONCURRENT")
            .unwrap_or_else(|_| "20".to_string())
            .parse::<usize>()?;

        Ok(Self {
            api_key,
            api_endpoint,
            model,
            timeout_ms,
            max_concurrent,
            ..defaults
        })
    }

    /// Layered load: defaults, then the optional file, then `TRANSLATOR_*`
    /// variables. Backend settings not set by any layer fall back to
    /// [`TranslatorConfig::from_env`].
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Self = builder.build()?.try_deserialize()?;
        let env = Self::from_env()?;
        let defaults = Self::default();

        if config.api_key.is_empty() {
            config.api_key = env.api_key;
        }
        if config.api_endpoint == defaults.api_endpoint {
            config.api_endpoint = env.api_endpoint;
        }
        if config.model == defaults.model {
            config.model = env.model;
        }
        if config.timeout_ms == defaults.timeout_ms {
            config.timeout_ms = env.timeout_ms;
        }
        if config.max_concurrent == defaults.max_concurrent {
            config.max_concurrent = env.max_concurrent;
        }

        match path {
            Some(path) => info!("Loaded configuration from {}", path.display()),
            None => info!("Loaded configuration from environment"),
        }
        Ok(config)
    }

    /// Load from a YAML or JSON file, chosen by extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = if is_yaml(path) {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_endpoint.is_empty() {
            return Err(anyhow::anyhow!("API endpoint is required"));
        }

        if self.api_key.is_empty() {
            warn!("No API key configured, the Qianwen backend will be unavailable");
        }

        if self.timeout_ms == 0 {
            return Err(anyhow::anyhow!("timeout_ms must be greater than 0"));
        }

        if self.max_concurrent == 0 {
            return Err(anyhow::anyhow!("max_concurrent must be greater than 0"));
        }

        if self.cache.max_entries == 0 || self.cache.max_size_bytes == 0 {
            return Err(anyhow::anyhow!("cache capacity must be greater than 0"));
        }

        let eviction = &self.cache.eviction;
        if eviction.low_hit_rate >= eviction.high_hit_rate {
            return Err(anyhow::anyhow!(
                "cache.eviction.low_hit_rate must be below high_hit_rate"
            ));
        }

        if self.batch.max_batch_size == 0 || self.batch.max_concurrency == 0 {
            return Err(anyhow::anyhow!(
                "batch.max_batch_size and batch.max_concurrency must be greater than 0"
            ));
        }

        let perf = &self.performance;
        if perf.recover_error_rate >= perf.degrade_error_rate {
            return Err(anyhow::anyhow!(
                "performance.recover_error_rate must be below degrade_error_rate"
            ));
        }
        if perf.recover_response_time_ms >= perf.degrade_response_time_ms {
            return Err(anyhow::anyhow!(
                "performance.recover_response_time_ms must be below degrade_response_time_ms"
            ));
        }
        if perf.minimal_error_rate <= perf.degrade_error_rate {
            return Err(anyhow::anyhow!(
                "performance.minimal_error_rate must be above degrade_error_rate"
            ));
        }

        if self.recovery.max_recovery_attempts == 0 {
            warn!("recovery.max_recovery_attempts is 0, failed calls will not be recovered");
        }

        Ok(())
    }

    /// API key, or a configuration error when none is set
    pub fn require_api_key(&self) -> Result<&str> {
        if self.api_key.is_empty() {
            return Err(TranslationError::ConfigError {
                message: "API key is required (set DASHSCOPE_API_KEY)".to_string(),
            });
        }
        Ok(&self.api_key)
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
