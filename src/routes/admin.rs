//! Channel administration endpoints
//!
//! Read and reset health rows, inspect cache counters, trigger coarse
//! invalidation and health-row cleanup.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::health::ChannelHealth;
use crate::RouterState;

/// Current health row for one channel (upserts an unknown row on first read)
pub async fn channel_health(
    State(state): State<Arc<RouterState>>,
    Path(id): Path<i64>,
) -> Json<ChannelHealth> {
    Json(state.health.get(id).await)
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub channel_id: i64,
    pub reset: bool,
}

/// Zero a channel's counters and return it to unknown
pub async fn reset_channel_health(
    State(state): State<Arc<RouterState>>,
    Path(id): Path<i64>,
) -> Json<ResetResponse> {
    state.health.reset(id).await;
    Json(ResetResponse {
        channel_id: id,
        reset: true,
    })
}

#[derive(Debug, Serialize)]
pub struct HealthyChannelsResponse {
    pub channel_ids: Vec<i64>,
}

/// Ids of channels whose health permits routing
pub async fn healthy_channels(
    State(state): State<Arc<RouterState>>,
) -> Json<HealthyChannelsResponse> {
    Json(HealthyChannelsResponse {
        channel_ids: state.health.list_healthy().await,
    })
}

#[derive(Debug, Deserialize)]
pub struct CleanupParams {
    /// Rows untouched for this many days are deleted
    pub days: i64,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub deleted: usize,
}

/// Delete aged health rows
pub async fn cleanup_health(
    State(state): State<Arc<RouterState>>,
    Query(params): Query<CleanupParams>,
) -> Json<CleanupResponse> {
    let deleted = state.health.cleanup_older_than(params.days).await;
    Json(CleanupResponse { deleted })
}

/// Candidate-cache counters
pub async fn cache_stats(State(state): State<Arc<RouterState>>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub invalidated: bool,
}

/// Coarse invalidation of both cache tiers
pub async fn invalidate_cache(State(state): State<Arc<RouterState>>) -> Json<InvalidateResponse> {
    state.cache.invalidate_all().await;
    Json(InvalidateResponse { invalidated: true })
}
