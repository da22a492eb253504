//! Translation orchestrator - request orchestration core for machine translation
//!
//! This library puts a content-addressed cache, health-aware service
//! selection, request merging, error-classified recovery and a degradation
//! controller in front of one or more translation backends.

#![forbid(unsafe_code)]

pub mod cli;
pub mod core;
pub mod server;

// Re-export key types for convenience
pub use core::{
    cache::TranslationCache,
    client::QianwenProvider,
    config::TranslatorConfig,
    context::OrchestrationContext,
    errors::{Result, TranslationError},
    models::{BatchStrategy, Priority, ServiceType, TranslationRequest},
    orchestrator::TranslationOrchestrator,
    performance::{DegradationEvent, PerformanceLevel, PerformanceReport},
    provider::TranslationProvider,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
