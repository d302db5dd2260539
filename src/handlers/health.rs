// src/handlers/health.rs

use crate::state::AppState;
use crate::storage::KeyStore;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

const SERVICE_NAME: &str = "Gemini Balance API";

/// `GET /health`: storage reachable and at least one enabled key.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let started = Instant::now();

    let storage = match state.pool().store().ping().await {
        Ok(()) => "ok",
        Err(e) => {
            error!(error = %e, "Storage health check failed");
            "error"
        }
    };

    let available_keys = match state.pool().list_candidates().await {
        Ok(keys) => keys.len(),
        Err(e) => {
            warn!(error = %e, "Failed to list keys for health check");
            0
        }
    };

    let healthy = storage == "ok" && available_keys > 0;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "timestamp": Utc::now().to_rfc3339(),
        "response_time_ms": started.elapsed().as_millis() as u64,
        "checks": {
            "storage": storage,
            "available_keys": available_keys,
        },
        "version": env!("CARGO_PKG_VERSION"),
    });

    (status, Json(body)).into_response()
}

/// `GET /status`: service metadata and key statistics.
pub async fn status(State(state): State<Arc<AppState>>) -> Response {
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds().max(0);

    match state.balancer().stats().await {
        Ok(stats) => {
            let unhealthy_keys = stats.pool.enabled_keys - stats.pool.healthy_keys;
            let degraded = |ok: bool| if ok { "operational" } else { "degraded" };
            Json(json!({
                "service": SERVICE_NAME,
                "version": env!("CARGO_PKG_VERSION"),
                "status": "operational",
                "timestamp": Utc::now().to_rfc3339(),
                "uptime_seconds": uptime_seconds,
                "strategy": stats.strategy,
                "statistics": {
                    "total_keys": stats.pool.total_keys,
                    "enabled_keys": stats.pool.enabled_keys,
                    "healthy_keys": stats.pool.healthy_keys,
                    "unhealthy_keys": unhealthy_keys,
                    "disabled_keys": stats.pool.total_keys - stats.pool.enabled_keys,
                    "by_status": stats.pool.by_status,
                    "total_requests": stats.pool.usage.total_requests,
                },
                "components": {
                    "api": "operational",
                    "storage": degraded(stats.pool.total_keys > 0),
                    "load_balancer": degraded(stats.pool.healthy_keys > 0),
                },
            }))
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to collect system status");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "service": SERVICE_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                    "status": "error",
                    "timestamp": Utc::now().to_rfc3339(),
                    "error": "Failed to collect key statistics",
                })),
            )
                .into_response()
        }
    }
}
