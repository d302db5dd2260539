// src/handlers/admin.rs

use crate::core::{BalancerStats, KeySnapshot, StrategyKind};
use crate::error::{AppError, Result};
use crate::middleware::admin_auth_middleware;
use crate::state::AppState;
use crate::storage::KeyId;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct AddKeyRequest {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyStateResponse {
    pub id: KeyId,
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct StrategyRequest {
    pub strategy: String,
}

#[derive(Debug, Serialize)]
pub struct StrategyResponse {
    pub strategy: StrategyKind,
    pub available: [StrategyKind; 3],
}

/// Admin routes, all behind bearer-token authentication.
pub fn admin_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/keys", get(list_keys).post(add_key))
        .route("/admin/keys/:id", delete(delete_key))
        .route("/admin/keys/:id/enabled", put(set_key_enabled))
        .route("/admin/stats", get(stats))
        .route("/admin/config/strategy", get(get_strategy).put(set_strategy))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}

async fn list_keys(State(state): State<Arc<AppState>>) -> Result<Json<Vec<KeySnapshot>>> {
    let keys = state.pool().list_all().await?;
    Ok(Json(keys.iter().map(KeySnapshot::from).collect()))
}

async fn add_key(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddKeyRequest>,
) -> Result<(StatusCode, Json<KeySnapshot>)> {
    let key = state.pool().add_key(&request.key).await?;
    Ok((StatusCode::CREATED, Json(KeySnapshot::from(&key))))
}

async fn delete_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<KeyId>,
) -> Result<StatusCode> {
    state.pool().delete_key(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_key_enabled(
    State(state): State<Arc<AppState>>,
    Path(id): Path<KeyId>,
    Json(request): Json<SetEnabledRequest>,
) -> Result<Json<KeyStateResponse>> {
    state.pool().set_enabled(id, request.enabled).await?;
    Ok(Json(KeyStateResponse {
        id,
        enabled: request.enabled,
    }))
}

async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<BalancerStats>> {
    Ok(Json(state.balancer().stats().await?))
}

async fn get_strategy(State(state): State<Arc<AppState>>) -> Json<StrategyResponse> {
    Json(StrategyResponse {
        strategy: state.balancer().current_strategy().await,
        available: StrategyKind::ALL,
    })
}

async fn set_strategy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StrategyRequest>,
) -> Result<Json<StrategyResponse>> {
    let strategy: StrategyKind = request
        .strategy
        .parse()
        .map_err(|e: String| AppError::validation("strategy", e))?;
    state.balancer().set_strategy(strategy).await?;
    Ok(Json(StrategyResponse {
        strategy,
        available: StrategyKind::ALL,
    }))
}
