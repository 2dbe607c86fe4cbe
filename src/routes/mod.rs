pub mod chat;
pub mod documents;
pub mod status;

use crate::config::AppConfig;
use crate::engine::ContextEngine;
use crate::errors::AppError;
use crate::session::SessionStore;
use crate::usage::UsageTracker;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

// Shared handler context
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ContextEngine>,
    pub session: Arc<SessionStore>,
    pub usage: Arc<UsageTracker>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        engine: Arc<ContextEngine>,
        session: Arc<SessionStore>,
        usage: Arc<UsageTracker>,
        config: &AppConfig,
    ) -> Self {
        Self {
            engine,
            session,
            usage,
            max_upload_bytes: config.max_upload_bytes(),
        }
    }
}

pub fn create_router(state: AppState, config: &AppConfig) -> Result<Router, AppError> {
    let metrics_router = crate::metrics::setup_metrics()?;
    let cors = cors_layer(config)?;
    let max_upload_bytes = state.max_upload_bytes;

    let api_routes = Router::new()
        .route(
            "/documents",
            post(documents::upload_document).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/chat", post(chat::chat))
        .route("/chat/stream", post(chat::chat_stream))
        .route("/context/status", get(status::context_status))
        .route("/messages", get(status::list_messages))
        .route("/messages/clear", delete(status::clear_messages))
        .route("/usage", get(status::usage_stats))
        .route("/health", get(status::health_check))
        .with_state(state);

    Ok(Router::new()
        .merge(api_routes)
        .merge(metrics_router)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Bounds time-to-response; SSE bodies stream on past it
                .layer(TimeoutLayer::new(config.request_timeout()))
                .layer(ConcurrencyLimitLayer::new(
                    config.server.max_concurrent_requests,
                ))
                .layer(cors),
        ))
}

fn cors_layer(config: &AppConfig) -> Result<CorsLayer, AppError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    if config.cors.origins.iter().any(|o| o == "*") {
        return Ok(layer.allow_origin(Any));
    }

    let origins = config
        .cors
        .origins
        .iter()
        .map(|origin| {
            origin.parse::<HeaderValue>().map_err(|_| {
                AppError::ValidationError(format!("invalid CORS origin: {}", origin))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}
