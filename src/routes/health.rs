//! Service health endpoints
//!
//! Liveness and readiness probes plus a fuller status report for
//! monitoring. Channel health (the routing signal) lives under `/admin`;
//! these endpoints cover the process itself.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::cache::CacheStats;
use crate::RouterState;

/// Health status enum
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
}

/// Full health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: ServiceStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: String,
    pub cache: CacheStats,
}

/// Simple health response for liveness/readiness
#[derive(Debug, Serialize)]
pub struct SimpleHealthResponse {
    pub status: ServiceStatus,
}

/// Full health check endpoint
pub async fn health_check(
    State(state): State<Arc<RouterState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let response = HealthResponse {
        status: ServiceStatus::Healthy,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        cache: state.cache.stats(),
    };

    (StatusCode::OK, Json(response))
}

/// Readiness probe endpoint
pub async fn readiness_check(
    State(state): State<Arc<RouterState>>,
) -> (StatusCode, Json<SimpleHealthResponse>) {
    // Ready once state is constructed; the shared cache tier is optional
    // and degrades gracefully, so it does not gate readiness.
    let _ = state.cache.stats();
    (
        StatusCode::OK,
        Json(SimpleHealthResponse {
            status: ServiceStatus::Healthy,
        }),
    )
}

/// Liveness probe endpoint
pub async fn liveness_check() -> (StatusCode, Json<SimpleHealthResponse>) {
    (
        StatusCode::OK,
        Json(SimpleHealthResponse {
            status: ServiceStatus::Healthy,
        }),
    )
}
