//! Upstream invocation seam
//!
//! The routing core treats the upstream call as an opaque async function:
//! a channel plus a request body goes in, a success payload or a
//! categorised error comes out. [`HttpUpstream`] is the production
//! implementation; tests inject scripted implementations of [`Upstream`].

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, error};

use crate::channel::Channel;

/// Categorised failure from an upstream call
///
/// Field names mirror the OpenAI error object so provider payloads pass
/// through unchanged.
#[derive(Debug, Clone)]
pub struct UpstreamError {
    pub status_code: u16,
    pub code: Option<String>,
    /// The provider's `type` field
    pub kind: Option<String>,
    pub message: String,
    pub param: Option<String>,
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.status_code, self.message)
    }
}

impl UpstreamError {
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            code: None,
            kind: None,
            message: message.into(),
            param: None,
        }
    }
}

/// One dispatch attempt's input, rewindable across retries
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub api_path: String,
    pub model: String,
    /// Body snapshot; cheap to clone, re-read on every retry
    pub body: Bytes,
    pub is_stream: bool,
}

/// Successful upstream result
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Opaque upstream call
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn invoke(
        &self,
        channel: &Channel,
        request: &UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamError>;
}

/// Wire shape of a provider error payload
#[derive(Debug, Deserialize)]
struct WireErrorEnvelope {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    code: Option<String>,
    param: Option<String>,
}

/// Providers send `code` as either a string or a number
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.map(|v| match v {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }))
}

/// Token usage block in a provider response
#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Production upstream client over reqwest
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn invoke(
        &self,
        channel: &Channel,
        request: &UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let base_url = channel.base_url.as_deref().ok_or_else(|| {
            UpstreamError::from_status(500, format!("channel #{} has no base URL", channel.id))
        })?;
        let url = format!("{}{}", base_url.trim_end_matches('/'), request.api_path);

        debug!(
            channel_id = channel.id,
            url = %url,
            model = %request.model,
            "Forwarding request upstream"
        );

        let mut builder = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request.body.clone());
        if let Some(key) = &channel.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            error!(channel_id = channel.id, error = %e, "Upstream request failed to send");
            UpstreamError::from_status(502, format!("failed to reach upstream: {e}"))
        })?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| {
            UpstreamError::from_status(502, format!("failed to read upstream response: {e}"))
        })?;

        if !(200..300).contains(&status) {
            // Prefer the provider's own error object when it parses
            if let Ok(envelope) = serde_json::from_slice::<WireErrorEnvelope>(&bytes) {
                return Err(UpstreamError {
                    status_code: status,
                    code: envelope.error.code,
                    kind: envelope.error.kind,
                    message: envelope.error.message,
                    param: envelope.error.param,
                });
            }
            return Err(UpstreamError::from_status(
                status,
                format!(
                    "upstream returned status {}: {}",
                    status,
                    String::from_utf8_lossy(&bytes)
                ),
            ));
        }

        let body: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| UpstreamError::from_status(502, format!("invalid upstream JSON: {e}")))?;
        let usage: WireUsage = body
            .get("usage")
            .and_then(|u| serde_json::from_value(u.clone()).ok())
            .unwrap_or_default();

        Ok(UpstreamResponse {
            status_code: status,
            body,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}
