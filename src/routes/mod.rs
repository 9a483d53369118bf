//! HTTP routes for Switchyard
//!
//! This module defines all HTTP endpoints exposed by the gateway core.

pub mod admin;
pub mod health;
pub mod relay;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::RouterState;

/// Create the main application router
pub fn create_router(state: Arc<RouterState>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Service health
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/health/live", get(health::liveness_check))
        // Relay entry for all inference paths
        .route("/v1/{*path}", post(relay::relay))
        // Channel administration
        .route(
            "/admin/channels/{id}/health",
            get(admin::channel_health),
        )
        .route(
            "/admin/channels/{id}/health/reset",
            post(admin::reset_channel_health),
        )
        .route("/admin/health/healthy", get(admin::healthy_channels))
        .route("/admin/health/cleanup", post(admin::cleanup_health))
        .route("/admin/cache/stats", get(admin::cache_stats))
        .route("/admin/cache/invalidate", post(admin::invalidate_cache))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
