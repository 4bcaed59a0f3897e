//! API Handlers
//!
//! HTTP request handlers for the cache admin endpoints. Unlike cached producers,
//! these report backend unavailability (503) instead of degrading silently.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::info;

use crate::cache::{CacheService, KeyValue, PingReport, StatsReport, StrategyCatalogue};
use crate::error::{CacheError, Result};
use crate::models::{
    DeleteResponse, HealthResponse, InvalidateRequest, InvalidateResponse, KeyListResponse,
    KeysQuery, MaintenanceResponse, MessageResponse, SetKeyRequest, SetResponse,
};
use crate::tasks::spawn_maintenance;

/// Application state shared across all handlers.
///
/// Holds the process-wide cache service; cloning only bumps the reference count.
#[derive(Debug, Clone)]
pub struct AppState {
    pub cache: Arc<CacheService>,
}

impl AppState {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }
}

/// Handler for GET /v1/cache/stats
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsReport>> {
    state.cache.ensure_available().await?;
    Ok(Json(state.cache.stats().await))
}

/// Handler for POST /v1/cache/stats/reset
pub async fn reset_stats_handler(State(state): State<AppState>) -> Json<MessageResponse> {
    state.cache.reset_stats();
    Json(MessageResponse::new("Cache statistics reset"))
}

/// Handler for POST /v1/cache/clear
pub async fn clear_handler(State(state): State<AppState>) -> Result<Json<MessageResponse>> {
    state.cache.clear().await?;
    Ok(Json(MessageResponse::new("Cache cleared successfully")))
}

/// Handler for POST /v1/cache/invalidate
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let affected = state.cache.invalidate_checked(&req.pattern).await?;
    info!(
        pattern = %req.pattern,
        reason = req.reason.as_deref().unwrap_or("-"),
        affected,
        "Invalidation requested"
    );

    Ok(Json(InvalidateResponse::new(&req.pattern, affected)))
}

/// Handler for GET /v1/cache/keys
pub async fn list_keys_handler(
    State(state): State<AppState>,
    Query(query): Query<KeysQuery>,
) -> Result<Json<KeyListResponse>> {
    let pattern = query.pattern();
    let keys = state.cache.list_keys(pattern, query.limit).await?;
    Ok(Json(KeyListResponse::new(pattern, keys)))
}

/// Handler for GET /v1/cache/keys/:key
pub async fn get_key_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<KeyValue>> {
    Ok(Json(state.cache.get_raw(&key).await?))
}

/// Handler for PUT /v1/cache/keys
pub async fn set_key_handler(
    State(state): State<AppState>,
    Json(req): Json<SetKeyRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let policy = req.policy();
    state.cache.set_raw(&req.key, req.value, &policy).await?;

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for DELETE /v1/cache/keys/:key
pub async fn delete_key_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    state.cache.delete_raw(&key).await?;
    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for GET /v1/cache/strategy
pub async fn strategy_handler(State(state): State<AppState>) -> Json<StrategyCatalogue> {
    Json(state.cache.strategies())
}

/// Handler for GET /v1/cache/ping
pub async fn ping_handler(State(state): State<AppState>) -> Json<PingReport> {
    Json(state.cache.ping().await)
}

/// Handler for POST /v1/cache/maintenance
///
/// Returns as soon as the task is spawned.
pub async fn maintenance_handler(
    State(state): State<AppState>,
) -> Result<Json<MaintenanceResponse>> {
    state.cache.ensure_available().await?;
    spawn_maintenance(Arc::clone(state.cache.store()));
    Ok(Json(MaintenanceResponse::scheduled()))
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let cache = state.cache.health().await;
    let now = state.cache.store().clock().now();
    Json(HealthResponse::from_store(cache, now))
}
