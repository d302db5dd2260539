// src/lib.rs

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod state;
pub mod storage;
pub mod upstream;

use crate::handlers::{admin_routes, chat_completions, health_check, list_models, status};
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Request as AxumRequest},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::{path::PathBuf, sync::Arc, time::Instant};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub use config::AppConfig;
pub use error::{AppError, Result};
pub use state::AppState;

/// Build the application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let max_body_bytes = state.config.server.max_body_bytes;

    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/metrics", get(metrics::metrics_handler))
        .merge(admin_routes(state.clone()))
        .layer(axum::middleware::from_fn(metrics::middleware::metrics_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(trace_requests))
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .with_state(state)
}

/// Request id, tracing span and `X-Request-ID` header for every request.
async fn trace_requests(
    mut req: AxumRequest<Body>,
    next: axum::middleware::Next,
) -> impl IntoResponse {
    let request_id = Uuid::new_v4();
    let start_time = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        http.method = %method,
        url.path = %path,
    );

    req.extensions_mut().insert(request_id);

    async move {
        let mut response = next.run(req).await;
        let elapsed = start_time.elapsed();

        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response.headers_mut().insert("X-Request-ID", value);
        }

        info!(
            http.response.duration = ?elapsed,
            http.status_code = response.status().as_u16(),
            "Finished processing request"
        );

        response
    }
    .instrument(span)
    .await
}

/// Resolve the configuration path: explicit override, then `CONFIG_PATH`,
/// then `config.yaml`.
pub fn config_path(config_path_override: Option<PathBuf>) -> PathBuf {
    config_path_override.unwrap_or_else(|| {
        std::env::var("CONFIG_PATH").map_or_else(|_| PathBuf::from("config.yaml"), PathBuf::from)
    })
}

/// Load and log the configuration.
pub fn setup_configuration(config_path_override: Option<PathBuf>) -> Result<AppConfig> {
    let config_path = config_path(config_path_override);
    let config_path_display = config_path.display().to_string();

    let app_config = config::load_config(&config_path).map_err(|e| {
        error!(
            config.path = %config_path_display,
            error = ?e,
            "Failed to load or validate configuration. Exiting."
        );
        e
    })?;

    info!(
        config.path = %config_path_display,
        config.total_keys = app_config.keys.len(),
        config.strategy = %app_config.balancer.strategy,
        server.port = app_config.server.port,
        "Configuration loaded and validated successfully."
    );

    Ok(app_config)
}

/// Build the state and router for `config`.
pub async fn run(app_config: AppConfig) -> Result<Router> {
    info!("Starting Gemini Balance proxy...");

    if let Err(e) = metrics::install_prometheus() {
        error!(error = %e, "Metrics exporter unavailable; continuing without /metrics");
    }

    let app_state = AppState::new(&app_config).await.map_err(|e| {
        error!(error = ?e, "Failed to initialize application state. Exiting.");
        e
    })?;
    info!("Application state initialized successfully.");

    Ok(create_router(Arc::new(app_state)))
}
