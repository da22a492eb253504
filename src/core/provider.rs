//! Translation backend capability

use async_trait::async_trait;

use crate::core::errors::Result;

/// A translation backend the registry can route to.
///
/// Object-safe; held as `Arc<dyn TranslationProvider>`.
#[async_trait]
pub trait TranslationProvider: Send + Sync + 'static {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    /// Selection priority, higher wins among healthy services
    fn priority(&self) -> u8 {
        0
    }

    /// Translate `text` from `source_lang` into `target_lang`
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;

    /// Cheap liveness probe
    async fn health_check(&self) -> Result<()>;
}
