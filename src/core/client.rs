//! Qianwen (DashScope) translation backend over the OpenAI-compatible API

use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::core::config::TranslatorConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::provider::TranslationProvider;

/// HTTP provider for Qianwen translation models
#[derive(Debug, Clone)]
pub struct QianwenProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    timeout_ms: u64,
    semaphore: Arc<Semaphore>,
}

impl QianwenProvider {
    /// Create a provider; fails without an API key
    pub fn new(config: &TranslatorConfig) -> Result<Self> {
        let api_key = config.require_api_key()?.to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            api_key,
            endpoint: config.api_endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout_ms: config.timeout_ms,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Transport failure, with timeouts reported against the configured limit
    fn transport_error(&self, err: reqwest::Error) -> TranslationError {
        if err.is_timeout() {
            TranslationError::TimeoutError {
                timeout_ms: self.timeout_ms,
            }
        } else {
            err.into()
        }
    }

    /// Send actual HTTP request
    async fn send_request(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": text,
            }],
            "translation_options": {
                "source_lang": language_name(source_lang),
                "target_lang": language_name(target_lang),
            }
        });

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| TranslationError::InternalError(e.to_string()))?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            // Retry-After has to be read before the body consumes the response
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let error_text = response.text().await.unwrap_or_default();
            return Err(map_status(status, retry_after, &error_text));
        }

        let json: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| TranslationError::InvalidResponseError {
                    message: e.to_string(),
                })?;

        let translation = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .ok_or_else(|| TranslationError::InvalidResponseError {
                message: "No translation in response".to_string(),
            })?
            .to_string();

        debug!(
            model = %self.model,
            request_id = json["id"].as_str().unwrap_or_default(),
            tokens = json["usage"]["total_tokens"].as_u64().unwrap_or(0),
            "Qianwen translation completed"
        );
        Ok(translation)
    }
}

#[async_trait]
impl TranslationProvider for QianwenProvider {
    fn name(&self) -> &str {
        "qianwen"
    }

    fn priority(&self) -> u8 {
        10
    }

    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String> {
        self.send_request(text, source_lang, target_lang).await
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/models", self.endpoint))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let error_text = response.text().await.unwrap_or_default();
        Err(map_status(status, None, &error_text))
    }
}

/// Map a non-2xx response to a typed error
fn map_status(status: StatusCode, retry_after: Option<u64>, body: &str) -> TranslationError {
    let message = error_message(body);
    match status.as_u16() {
        401 | 403 => TranslationError::AuthenticationError { message },
        429 => TranslationError::RateLimitError { retry_after },
        400 | 422 => TranslationError::InvalidInput { message },
        502..=504 => TranslationError::ServiceUnavailable { message },
        code => TranslationError::ApiError {
            status: code,
            message,
        },
    }
}

/// Pull `error.message` (or `message`) out of an error payload
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json["error"]["message"]
                .as_str()
                .or_else(|| json["message"].as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Language names accepted by the translation models; unknown codes pass through
fn language_name(code: &str) -> &str {
    match code.to_ascii_lowercase().as_str() {
        "" | "auto" => "auto",
        "en" => "English",
        "zh" | "zh-cn" | "zh-hans" => "Chinese",
        "zh-tw" | "zh-hant" => "Traditional Chinese",
        "ja" => "Japanese",
        "ko" => "Korean",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "ru" => "Russian",
        "pt" => "Portuguese",
        "it" => "Italian",
        _ => code,
    }
}
