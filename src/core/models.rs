//! Core data models for translation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Request priority, ordered from lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    /// Number of steps between two priorities
    pub fn distance(self, other: Priority) -> u8 {
        (self as u8).abs_diff(other as u8)
    }

    /// Whether two priorities may share a merged request
    pub fn is_adjacent(self, other: Priority) -> bool {
        self.distance(other) <= 1
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Source/target language pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.target)
    }
}

/// Translation request
///
/// Immutable once built; the builder methods consume the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    id: Uuid,
    text: String,
    source_lang: String,
    target_lang: String,
    priority: Priority,
    submitted_at: DateTime<Utc>,
}

impl TranslationRequest {
    pub fn new(
        text: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            priority: Priority::Normal,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source_lang(&self) -> &str {
        &self.source_lang
    }

    pub fn target_lang(&self) -> &str {
        &self.target_lang
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn language_pair(&self) -> LanguagePair {
        LanguagePair::new(self.source_lang.clone(), self.target_lang.clone())
    }

    /// Same language pair as `other`
    pub fn shares_pair(&self, other: &TranslationRequest) -> bool {
        self.source_lang == other.source_lang && self.target_lang == other.target_lang
    }
}

/// Backend identity used by the service registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Qianwen (DashScope) translation model
    Qianwen,
    /// Any other OpenAI-compatible endpoint
    OpenAiCompatible,
    /// Named custom backend
    Custom(String),
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::Qianwen => write!(f, "qianwen"),
            ServiceType::OpenAiCompatible => write!(f, "openai_compatible"),
            ServiceType::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// How a batch is executed upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStrategy {
    /// Merge compatible requests into combined calls
    Merged,
    /// One upstream call per request
    Sequential,
    /// Merge when the batch has a single language pair, otherwise sequential
    Adaptive,
}

impl Default for BatchStrategy {
    fn default() -> Self {
        BatchStrategy::Adaptive
    }
}

impl fmt::Display for BatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStrategy::Merged => write!(f, "merged"),
            BatchStrategy::Sequential => write!(f, "sequential"),
            BatchStrategy::Adaptive => write!(f, "adaptive"),
        }
    }
}
