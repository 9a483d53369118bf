//! Relay entry point
//!
//! Accepts any `/v1/*` inference request, runs it through the dispatch
//! loop, and reflects the routing outcome in the response headers:
//! `X-OneAPI-Generation-Id`, `X-OneAPI-Channel`, `X-OneAPI-Channel-Name`
//! and `X-OneAPI-Latency-Ms` (last attempt).

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dispatch::{RelayOutcome, RelayRequest};
use crate::error::AppError;
use crate::routing::strategy::StrategyKind;
use crate::RouterState;

pub const HEADER_GENERATION_ID: &str = "x-oneapi-generation-id";
pub const HEADER_CHANNEL: &str = "x-oneapi-channel";
pub const HEADER_CHANNEL_NAME: &str = "x-oneapi-channel-name";
pub const HEADER_LATENCY_MS: &str = "x-oneapi-latency-ms";

/// Request fields the router needs before forwarding the opaque body
#[derive(Debug, Deserialize)]
struct RelayBody {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    stream: bool,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_i64(headers: &HeaderMap, name: &str) -> i64 {
    header_str(headers, name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Relay handler for every `/v1/*` inference path
pub async fn relay(
    State(state): State<Arc<RouterState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = header_str(&headers, "x-request-id")
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    let parsed: RelayBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return AppError::BadRequest(format!("invalid JSON body: {e}")).into_response()
        }
    };
    let Some(model) = parsed.model else {
        return AppError::BadRequest("model field is required".to_string()).into_response();
    };

    let strategy = match header_str(&headers, "x-oneapi-strategy") {
        Some(raw) => match raw.parse::<StrategyKind>() {
            Ok(kind) => Some(kind),
            Err(e) => return AppError::BadRequest(e.to_string()).into_response(),
        },
        None => None,
    };

    let specific_channel_id = match header_str(&headers, "x-oneapi-channel-id") {
        Some(raw) => match raw.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                return AppError::BadRequest(format!("invalid channel id {raw}")).into_response()
            }
        },
        None => None,
    };

    let request = RelayRequest {
        request_id,
        user_id: header_i64(&headers, "x-oneapi-user-id"),
        token_id: header_i64(&headers, "x-oneapi-token-id"),
        group: header_str(&headers, "x-oneapi-group")
            .unwrap_or("default")
            .to_string(),
        model,
        api_path: format!("/v1/{path}"),
        body,
        is_stream: parsed.stream,
        strategy,
        specific_channel_id,
        cancel: CancellationToken::new(),
    };

    let outcome = state.dispatcher.handle(request).await;
    outcome_response(outcome)
}

fn outcome_response(outcome: RelayOutcome) -> Response {
    let mut response = match outcome.result {
        Ok(upstream) => Json(upstream.body).into_response(),
        Err(err) => err.into_response(),
    };

    let headers = response.headers_mut();
    insert_header(headers, HEADER_GENERATION_ID, &outcome.generation_id);
    if let Some(channel_id) = outcome.channel_id {
        insert_header(headers, HEADER_CHANNEL, &channel_id.to_string());
    }
    if let Some(name) = &outcome.channel_name {
        insert_header(headers, HEADER_CHANNEL_NAME, name);
    }
    insert_header(
        headers,
        HEADER_LATENCY_MS,
        &outcome.last_latency_ms.to_string(),
    );

    response
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
