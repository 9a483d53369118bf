//! Asynchronous failure classification
//!
//! Decides, off the hot path, whether an upstream failure indicts the
//! channel itself (bad credentials, suspended account, missing model,
//! persistent overload) rather than the request. Provider wording changes
//! often; everything funnels through [`should_disable`] so the pattern
//! list has a single home.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::cache::ChannelCache;
use crate::source::ChannelSource;
use crate::upstream::UpstreamError;

/// Error codes that always indict the channel
const DISABLE_CODES: &[&str] = &[
    "invalid_api_key",
    "account_deactivated",
    "billing_not_active",
    "insufficient_quota",
    "model_not_found",
    "permission_denied",
];

/// Error types that always indict the channel
const DISABLE_TYPES: &[&str] = &["authentication_error", "insufficient_quota"];

/// Message fragments that indict the channel, matched case-insensitively
const DISABLE_PATTERNS: &[&str] = &[
    "incorrect api key",
    "api key not valid",
    "account has been suspended",
    "organization has been restricted",
    "exceeded your current quota",
    "insufficient balance",
    "credit balance is too low",
    "does not exist or you do not have access",
    "service is currently overloaded",
];

/// Whether this failure should auto-disable the channel
pub fn should_disable(err: &UpstreamError) -> bool {
    if err.status_code == 401 {
        return true;
    }

    if let Some(kind) = &err.kind {
        if DISABLE_TYPES.contains(&kind.as_str()) {
            return true;
        }
    }

    if let Some(code) = &err.code {
        if DISABLE_CODES.contains(&code.as_str()) {
            return true;
        }
    }

    let message = err.message.to_lowercase();
    DISABLE_PATTERNS.iter().any(|p| message.contains(p))
}

/// Handle one failed attempt asynchronously
///
/// Takes the error by value: the dispatcher keeps mutating its own copy
/// (message rewrites) after spawning this task.
pub async fn process_failure(
    source: Arc<dyn ChannelSource>,
    cache: Arc<ChannelCache>,
    channel_id: i64,
    channel_name: String,
    user_id: i64,
    err: UpstreamError,
) {
    error!(
        channel_id = channel_id,
        channel_name = %channel_name,
        user_id = user_id,
        status = err.status_code,
        code = err.code.as_deref().unwrap_or(""),
        "Relay attempt failed: {}",
        err.message
    );

    if should_disable(&err) {
        info!(
            channel_id = channel_id,
            channel_name = %channel_name,
            "Disabling channel after classifiable failure"
        );
        if let Err(e) = source.disable(channel_id, "auto").await {
            error!(channel_id = channel_id, error = %e, "Channel disable failed");
            return;
        }
        cache.invalidate(channel_id).await;
    } else {
        // Not the channel's fault; surface for monitoring only
        warn!(
            channel_id = channel_id,
            status = err.status_code,
            "Channel failure recorded, no disable"
        );
    }
}
