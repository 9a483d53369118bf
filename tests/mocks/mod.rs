//! Test mocks for the routing core
//!
//! The upstream seam is scripted per channel; unscripted channels answer
//! with a canned success so tests only describe the interesting outcomes.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use switchyard::channel::Channel;
use switchyard::upstream::{Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};

/// Canned 200 response with a small usage block
pub fn ok_response() -> UpstreamResponse {
    UpstreamResponse {
        status_code: 200,
        body: json!({
            "id": "chatcmpl-test",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "ok"}}],
            "usage": {"prompt_tokens": 11, "completion_tokens": 22, "total_tokens": 33}
        }),
        prompt_tokens: 11,
        completion_tokens: 22,
    }
}

/// Plain status error without provider decoration
pub fn status_error(status: u16) -> UpstreamError {
    UpstreamError::from_status(status, format!("upstream returned status {status}"))
}

/// Credential error in the provider's own shape
pub fn auth_error() -> UpstreamError {
    UpstreamError {
        status_code: 401,
        code: Some("invalid_api_key".to_string()),
        kind: Some("authentication_error".to_string()),
        message: "Incorrect API key provided".to_string(),
        param: None,
    }
}

/// Scriptable upstream: per-channel queues of outcomes
pub struct ScriptedUpstream {
    scripts: Mutex<HashMap<i64, VecDeque<Result<UpstreamResponse, UpstreamError>>>>,
    invocations: Mutex<Vec<i64>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }

    /// Queue one outcome for a channel; unscripted invocations succeed
    pub fn script(&self, channel_id: i64, outcome: Result<UpstreamResponse, UpstreamError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(channel_id)
            .or_default()
            .push_back(outcome);
    }

    /// Make every invocation take at least this long
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Channel ids in invocation order
    pub fn invocations(&self) -> Vec<i64> {
        self.invocations.lock().unwrap().clone()
    }
}

impl Default for ScriptedUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn invoke(
        &self,
        channel: &Channel,
        _request: &UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.invocations.lock().unwrap().push(channel.id);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&channel.id)
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or_else(|| Ok(ok_response()))
    }
}
