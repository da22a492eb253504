//! HTTP API server implementation

use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::client::QianwenProvider;
use crate::core::config::TranslatorConfig;
use crate::core::context::OrchestrationContext;
use crate::core::errors::TranslationError;
use crate::core::models::{Priority, ServiceType, TranslationRequest};
use crate::core::orchestrator::TranslationOrchestrator;
use crate::core::performance::PerformanceReport;
use crate::core::provider::TranslationProvider;
use crate::core::registry::ServiceDescriptor;

/// Application state
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<TranslationOrchestrator>,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

/// Registered services response
#[derive(Serialize)]
struct ServicesResponse {
    services: Vec<ServiceDescriptor>,
}

/// Batch translation request
#[derive(Deserialize)]
pub struct TranslateRequest {
    pub source_lang: Option<String>,
    pub target_lang: String,
    pub text_list: Vec<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

/// Batch translation response
#[derive(Serialize)]
pub struct TranslateResponse {
    pub translations: Vec<TranslationItem>,
}

/// One translated text, or the error that prevented it
#[derive(Serialize)]
pub struct TranslationItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

impl From<&TranslationError> for ErrorDetail {
    fn from(err: &TranslationError) -> Self {
        let kind = match err {
            TranslationError::EmptyInput | TranslationError::InvalidInput { .. } => {
                "invalid_request_error"
            }
            TranslationError::RateLimitError { .. } => "rate_limit_error",
            TranslationError::AuthenticationError { .. } | TranslationError::ConfigError { .. } => {
                "authentication_error"
            }
            _ => "api_error",
        };
        Self {
            message: err.to_string(),
            code: Some(err.code().to_string()),
            r#type: Some(kind.to_string()),
        }
    }
}

fn bad_request(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: ErrorDetail {
                message: message.to_string(),
                code: Some("invalid_request".to_string()),
                r#type: Some("invalid_request_error".to_string()),
            },
        }),
    )
}

/// Map client-facing language codes to the ones the backend expects
fn normalize_lang(lang: &str) -> String {
    match lang {
        "zh-CN" => "zh",
        "zh-TW" => "zh-Hant",
        "no" => "nb",
        other => other,
    }
    .to_string()
}

/// Health check handler
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Registered services with health and metrics
async fn get_services(State(state): State<Arc<AppState>>) -> Json<ServicesResponse> {
    Json(ServicesResponse {
        services: state.orchestrator.registry().descriptors().await,
    })
}

/// Current performance report
async fn get_performance(State(state): State<Arc<AppState>>) -> Json<PerformanceReport> {
    Json(state.orchestrator.performance_report().await)
}

/// Batch translation handler
async fn translate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TranslateRequest>,
) -> Result<Json<TranslateResponse>, (StatusCode, Json<ErrorResponse>)> {
    if payload.text_list.is_empty() {
        return Err(bad_request("text_list cannot be empty"));
    }
    if payload.target_lang.trim().is_empty() {
        return Err(bad_request("target_lang is required"));
    }

    let source_lang = payload
        .source_lang
        .as_deref()
        .map(normalize_lang)
        .unwrap_or_else(|| "auto".to_string());
    let target_lang = normalize_lang(&payload.target_lang);
    let priority = payload.priority.unwrap_or_default();

    let requests: Vec<TranslationRequest> = payload
        .text_list
        .iter()
        .map(|text| {
            TranslationRequest::new(text.as_str(), source_lang.as_str(), target_lang.as_str())
                .with_priority(priority)
        })
        .collect();

    let results = state
        .orchestrator
        .translate_batch_detailed(&requests, priority)
        .await;

    let translations = results
        .into_iter()
        .map(|result| match result {
            Ok(text) => TranslationItem {
                text: Some(text),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "Translation failed");
                TranslationItem {
                    text: None,
                    error: Some(ErrorDetail::from(&e)),
                }
            }
        })
        .collect();

    Ok(Json(TranslateResponse { translations }))
}

/// Build the API router
pub fn create_router(orchestrator: Arc<TranslationOrchestrator>) -> Router {
    let state = Arc::new(AppState { orchestrator });

    Router::new()
        .route("/", get(health_check))
        .route("/v1/services", get(get_services))
        .route("/v1/performance", get(get_performance))
        .route("/translate", post(translate))
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: TranslatorConfig, host: String, port: u16) -> anyhow::Result<()> {
    let qianwen = QianwenProvider::new(&config)?;
    info!(model = %qianwen.model(), endpoint = %config.api_endpoint, "Qianwen provider ready");
    let provider: Arc<dyn TranslationProvider> = Arc::new(qianwen);
    let context = OrchestrationContext::start(config, vec![(ServiceType::Qianwen, provider)]).await?;

    let app = create_router(context.orchestrator().clone());

    // Bind address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    context.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::MockProvider;
    use assert_json_diff::{assert_json_eq, assert_json_include};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app(provider: Arc<MockProvider>) -> Router {
        let orchestrator = TranslationOrchestrator::new(&TranslatorConfig::default()).unwrap();
        orchestrator
            .register_service(ServiceType::Qianwen, provider)
            .await;
        create_router(Arc::new(orchestrator))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = app(Arc::new(MockProvider::new("q")))
            .await
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_json_include!(actual: body_json(response).await, expected: json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_translate_endpoint() {
        let provider = Arc::new(MockProvider::new("q").with_translation("Hello", "你好"));
        let response = app(provider)
            .await
            .oneshot(post_json(
                "/translate",
                json!({"source_lang": "en", "target_lang": "zh-CN", "text_list": ["Hello", "World"]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_json_eq!(
            body_json(response).await,
            json!({"translations": [{"text": "你好"}, {"text": "[zh]World"}]})
        );
    }

    #[tokio::test]
    async fn test_translate_reports_per_item_errors() {
        let response = app(Arc::new(MockProvider::new("q")))
            .await
            .oneshot(post_json(
                "/translate",
                json!({"target_lang": "zh", "text_list": ["ok", "  "], "priority": "high"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_json_include!(
            actual: body_json(response).await,
            expected: json!({"translations": [
                {"text": "[zh]ok"},
                {"error": {"code": "empty_input", "type": "invalid_request_error"}}
            ]})
        );
    }

    #[tokio::test]
    async fn test_translate_rejects_empty_list() {
        let response = app(Arc::new(MockProvider::new("q")))
            .await
            .oneshot(post_json("/translate", json!({"target_lang": "zh", "text_list": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_json_include!(
            actual: body_json(response).await,
            expected: json!({"error": {"code": "invalid_request"}})
        );
    }

    #[tokio::test]
    async fn test_services_and_performance_endpoints() {
        let router = app(Arc::new(MockProvider::new("mock-q"))).await;

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/v1/services").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_json_include!(
            actual: body_json(response).await,
            expected: json!({"services": [{"name": "mock-q", "service_type": "qianwen", "status": {"state": "unknown"}}]})
        );

        let response = router
            .oneshot(Request::builder().uri("/v1/performance").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_json_include!(
            actual: body_json(response).await,
            expected: json!({"level": "optimal", "degradation_active": false})
        );
    }
}
