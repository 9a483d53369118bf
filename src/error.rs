//! Error types for Switchyard
//!
//! Selection and upstream errors are surfaced to the caller; failures in
//! side-systems (health store, telemetry, caches) are logged where they
//! happen and never reach the request path.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::upstream::UpstreamError;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("no available channels for group={group}, model={model}")]
    NoCandidates { group: String, model: String },

    #[error("no healthy channels available for group={group}, model={model}")]
    NoHealthy { group: String, model: String },

    #[error("strategy {0} failed to select a channel")]
    StrategyFailure(String),

    #[error("upstream error: {}", .0.message)]
    Upstream(UpstreamError),

    #[error("request cancelled")]
    Cancelled,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("channel is disabled")]
    ChannelDisabled,

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Wire shape of the error body: `{"error": {...}}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error details, OpenAI-compatible field names
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub param: String,
    pub code: String,
}

/// Client-error status used for cancelled requests (nginx convention)
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

impl AppError {
    /// HTTP status this error surfaces with
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NoCandidates { .. }
            | AppError::NoHealthy { .. }
            | AppError::StrategyFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream(err) => {
                StatusCode::from_u16(err.status_code).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::Cancelled => StatusCode::from_u16(STATUS_CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ChannelDisabled => StatusCode::FORBIDDEN,
            AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Redis(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Http(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Body payload for the wire
    pub fn error_body(&self) -> ErrorBody {
        match self {
            AppError::Upstream(err) => ErrorBody {
                message: err.message.clone(),
                kind: err
                    .kind
                    .clone()
                    .unwrap_or_else(|| "upstream_error".to_string()),
                param: err.param.clone().unwrap_or_default(),
                code: err.code.clone().unwrap_or_default(),
            },
            other => ErrorBody {
                message: other.to_string(),
                kind: "one_api_error".to_string(),
                param: String::new(),
                code: match other {
                    AppError::NoCandidates { .. } => "no_candidates",
                    AppError::NoHealthy { .. } => "no_healthy_channels",
                    AppError::StrategyFailure(_) => "strategy_failure",
                    AppError::Cancelled => "request_cancelled",
                    AppError::BadRequest(_) => "bad_request",
                    AppError::ChannelDisabled => "channel_disabled",
                    _ => "internal_error",
                }
                .to_string(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.error_body(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
