//! HTTP API gateway for ragline.
//!
//! Exposes streaming chat, source management, history and settings
//! endpoints. Routes live in [`api_v1`]; this module owns the shared state,
//! the middleware stack and server startup.
//!
//! Built on Axum for high performance async HTTP.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::{Router, response::Json, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use ragline_config::AppConfig;
use ragline_core::{HistoryStore, InferenceEngine, PipelineError};
use ragline_pipeline::{InferenceExecutor, Pipeline};
use ragline_retrieval::{InMemoryHistory, ScopedRetriever};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub pipeline: Arc<Pipeline>,
    /// The index behind the pipeline's retriever, for source management.
    pub sources: Arc<ScopedRetriever>,
    pub start_time: DateTime<Utc>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Wire an engine into a ready pipeline with an empty index and history.
    pub fn build(
        config: AppConfig,
        engine: Box<dyn InferenceEngine>,
    ) -> Result<SharedState, PipelineError> {
        let executor = Arc::new(InferenceExecutor::start(
            engine,
            config.executor.fragment_buffer,
        )?);
        let sources = Arc::new(ScopedRetriever::new(&config.retrieval));
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistory::new());
        let pipeline = Arc::new(Pipeline::from_config(
            &config,
            executor,
            sources.clone(),
            history,
        ));

        Ok(Arc::new(Self {
            config,
            pipeline,
            sources,
            start_time: Utc::now(),
        }))
    }
}

/// Build the full router.
///
/// Layers applied:
/// - CORS restricted to the configured origins
/// - Request body size limit
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.gateway.cors_origins);
    let body_limit = state.config.gateway.body_limit_bytes;

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
///
/// The engine is loaded before the listener is bound, so a missing model
/// fails startup instead of the first request.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let engine_config = config.engine.clone();
    let engine =
        tokio::task::spawn_blocking(move || ragline_engine::build_engine(&engine_config)).await??;
    let state = GatewayState::build(config, engine)?;
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
pub(crate) fn test_state() -> SharedState {
    GatewayState::build(
        AppConfig::default(),
        Box::new(ragline_engine::EchoEngine::new()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state());

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let app = build_router(test_state());

        let req = Request::builder()
            .method("OPTIONS")
            .uri("/api/v1/chat/stream")
            .header("origin", "http://localhost:4200")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "http://localhost:4200"
        );
    }

    #[tokio::test]
    async fn cors_ignores_unknown_origin() {
        let app = build_router(test_state());

        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://evil.example")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert!(
            response
                .headers()
                .get("access-control-allow-origin")
                .is_none()
        );
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let mut config = AppConfig::default();
        config.gateway.body_limit_bytes = 64;
        let state =
            GatewayState::build(config, Box::new(ragline_engine::EchoEngine::new())).unwrap();
        let app = build_router(state);

        let body = serde_json::json!({ "source_id": "big", "text": "x".repeat(1_000) });
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/sources")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
