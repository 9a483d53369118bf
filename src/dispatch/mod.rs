//! Request dispatch with retry and failover
//!
//! The dispatcher runs the selected upstream call, updates health and
//! strategy feedback on every outcome, emits one telemetry row per attempt,
//! and retries failed calls on a fresh channel within the configured
//! budget.

pub mod classify;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::ChannelCache;
use crate::channel::{Channel, SelectRequest};
use crate::clock::SharedClock;
use crate::error::{AppError, AppResult, STATUS_CLIENT_CLOSED_REQUEST};
use crate::health::HealthStore;
use crate::routing::strategy::{StrategyKind, StrategyRegistry};
use crate::routing::Engine;
use crate::source::ChannelSource;
use crate::telemetry::{CallMetadata, TelemetrySink};
use crate::upstream::{Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};

/// Message shown when the terminal failure was an upstream rate limit
const SATURATED_MESSAGE: &str =
    "The upstream load of the current group is saturated, please try again later";

/// In-flight request counts per channel, process-local
pub struct ConcurrencyGauge {
    counts: RwLock<HashMap<i64, Arc<AtomicI64>>>,
}

impl ConcurrencyGauge {
    pub fn new() -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
        }
    }

    fn counter(&self, channel_id: i64) -> Arc<AtomicI64> {
        if let Some(counter) = self.counts.read().unwrap().get(&channel_id) {
            return counter.clone();
        }
        self.counts
            .write()
            .unwrap()
            .entry(channel_id)
            .or_insert_with(|| Arc::new(AtomicI64::new(0)))
            .clone()
    }

    pub fn get(&self, channel_id: i64) -> i64 {
        self.counts
            .read()
            .unwrap()
            .get(&channel_id)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Count a request against a channel until the guard drops
    pub fn track(&self, channel_id: i64) -> InFlightGuard {
        let counter = self.counter(channel_id);
        counter.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { counter }
    }
}

impl Default for ConcurrencyGauge {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InFlightGuard {
    counter: Arc<AtomicI64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// One client request as the dispatcher sees it
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub request_id: String,
    pub user_id: i64,
    pub token_id: i64,
    pub group: String,
    pub model: String,
    pub api_path: String,
    /// Body snapshot, re-read on every retry
    pub body: Bytes,
    pub is_stream: bool,
    pub strategy: Option<StrategyKind>,
    /// Pinning a channel disables selection and retry
    pub specific_channel_id: Option<i64>,
    pub cancel: CancellationToken,
}

/// Final result of a dispatch, with everything the HTTP layer needs for
/// response headers
#[derive(Debug)]
pub struct RelayOutcome {
    pub generation_id: String,
    /// Channel of the last attempt, if one was ever resolved
    pub channel_id: Option<i64>,
    pub channel_name: Option<String>,
    /// Latency of the last attempt only, not cumulative
    pub last_latency_ms: i64,
    pub result: Result<UpstreamResponse, AppError>,
}

enum AttemptError {
    Cancelled,
    Upstream(UpstreamError),
}

/// Should a failed attempt with this status be retried on another channel
fn retryable(status: u16) -> bool {
    match status {
        429 => true,
        500..=599 => true,
        400 => false,
        200..=299 => false,
        _ => true,
    }
}

/// Dispatch loop
pub struct Dispatcher {
    engine: Arc<Engine>,
    source: Arc<dyn ChannelSource>,
    health: Arc<HealthStore>,
    registry: Arc<StrategyRegistry>,
    telemetry: Arc<TelemetrySink>,
    upstream: Arc<dyn Upstream>,
    cache: Arc<ChannelCache>,
    concurrency: Arc<ConcurrencyGauge>,
    clock: SharedClock,
    retry_times: u32,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<Engine>,
        source: Arc<dyn ChannelSource>,
        health: Arc<HealthStore>,
        registry: Arc<StrategyRegistry>,
        telemetry: Arc<TelemetrySink>,
        upstream: Arc<dyn Upstream>,
        cache: Arc<ChannelCache>,
        concurrency: Arc<ConcurrencyGauge>,
        clock: SharedClock,
        retry_times: u32,
    ) -> Self {
        Self {
            engine,
            source,
            health,
            registry,
            telemetry,
            upstream,
            cache,
            concurrency,
            clock,
            retry_times,
        }
    }

    /// Run one client request to completion, retrying within budget
    pub async fn handle(&self, req: RelayRequest) -> RelayOutcome {
        let generation_id = Uuid::new_v4().simple().to_string();

        let mut channel = match self.initial_channel(&req).await {
            Ok(channel) => channel,
            Err(e) => {
                return RelayOutcome {
                    generation_id,
                    channel_id: None,
                    channel_name: None,
                    last_latency_ms: 0,
                    result: Err(e),
                }
            }
        };

        let pinned = req.specific_channel_id.is_some();
        let mut remaining = if pinned { 0 } else { self.retry_times };
        let mut attempt: u32 = 0;

        loop {
            let (result, latency) = self.attempt_once(&channel, &req).await;
            self.record_attempt(&req, &generation_id, channel.id, attempt, latency, &result);

            match result {
                Ok(response) => {
                    self.health.on_success(channel.id, latency.max(0) as u32).await;
                    self.registry.on_success(channel.id);
                    return RelayOutcome {
                        generation_id,
                        channel_id: Some(channel.id),
                        channel_name: Some(channel.name.clone()),
                        last_latency_ms: latency,
                        result: Ok(response),
                    };
                }
                Err(AttemptError::Cancelled) => {
                    // Client is gone; the attempt is abandoned without a
                    // health verdict because no response was observed.
                    info!(
                        channel_id = channel.id,
                        attempt = attempt,
                        "Request cancelled during upstream call"
                    );
                    return RelayOutcome {
                        generation_id,
                        channel_id: Some(channel.id),
                        channel_name: Some(channel.name.clone()),
                        last_latency_ms: latency,
                        result: Err(AppError::Cancelled),
                    };
                }
                Err(AttemptError::Upstream(err)) => {
                    let code = err
                        .code
                        .clone()
                        .unwrap_or_else(|| err.status_code.to_string());
                    self.health.on_failure(channel.id, &code).await;
                    self.registry.on_failure(channel.id);

                    // The handler gets its own copy; the terminal path
                    // below rewrites this one.
                    tokio::spawn(classify::process_failure(
                        self.source.clone(),
                        self.cache.clone(),
                        channel.id,
                        channel.name.clone(),
                        req.user_id,
                        err.clone(),
                    ));

                    if pinned || !retryable(err.status_code) {
                        debug!(
                            status = err.status_code,
                            pinned = pinned,
                            "Not retrying this failure"
                        );
                        return self.terminal(generation_id, &channel, latency, err, &req);
                    }

                    match self.next_channel(&req, channel.id, &mut remaining).await {
                        Some(next) => {
                            attempt += 1;
                            info!(
                                channel_id = next.id,
                                attempt = attempt,
                                remaining = remaining,
                                "Retrying on a fresh channel"
                            );
                            channel = next;
                        }
                        None => {
                            if req.cancel.is_cancelled() {
                                return RelayOutcome {
                                    generation_id,
                                    channel_id: Some(channel.id),
                                    channel_name: Some(channel.name.clone()),
                                    last_latency_ms: latency,
                                    result: Err(AppError::Cancelled),
                                };
                            }
                            return self.terminal(generation_id, &channel, latency, err, &req);
                        }
                    }
                }
            }
        }
    }

    /// Channel for the first attempt: pinned id or engine selection
    async fn initial_channel(&self, req: &RelayRequest) -> AppResult<Channel> {
        if let Some(id) = req.specific_channel_id {
            let channel = self
                .source
                .by_id(id)
                .await?
                .ok_or_else(|| AppError::BadRequest(format!("invalid channel id {id}")))?;
            if !channel.is_enabled() {
                return Err(AppError::ChannelDisabled);
            }
            return Ok(channel);
        }
        Ok(self.engine.select(&self.select_request(req)).await?.channel)
    }

    /// Fresh channel for a retry, consuming budget; skips a selection equal
    /// to the channel that just failed
    async fn next_channel(
        &self,
        req: &RelayRequest,
        last_failed_channel_id: i64,
        remaining: &mut u32,
    ) -> Option<Channel> {
        while *remaining > 0 {
            *remaining -= 1;
            if req.cancel.is_cancelled() {
                return None;
            }
            let mut select_req = self.select_request(req);
            select_req.exclude_channel_id = Some(last_failed_channel_id);
            match self.engine.select(&select_req).await {
                Ok(selection) => {
                    if selection.channel.id == last_failed_channel_id {
                        // Sole remaining candidate; skipping it consumes
                        // the attempt, as does any other selection.
                        debug!(
                            channel_id = last_failed_channel_id,
                            "Selection repeated the failed channel, skipping"
                        );
                        continue;
                    }
                    return Some(selection.channel);
                }
                Err(e) => {
                    warn!(error = %e, "Retry selection failed");
                    return None;
                }
            }
        }
        None
    }

    fn select_request(&self, req: &RelayRequest) -> SelectRequest {
        SelectRequest {
            request_id: req.request_id.clone(),
            user_id: req.user_id,
            group: req.group.clone(),
            model: req.model.clone(),
            strategy: req.strategy,
            specific_channel_id: req.specific_channel_id,
            exclude_channel_id: None,
        }
    }

    async fn attempt_once(
        &self,
        channel: &Channel,
        req: &RelayRequest,
    ) -> (Result<UpstreamResponse, AttemptError>, i64) {
        let _in_flight = self.concurrency.track(channel.id);
        let upstream_req = UpstreamRequest {
            api_path: req.api_path.clone(),
            model: req.model.clone(),
            body: req.body.clone(),
            is_stream: req.is_stream,
        };

        let start = Instant::now();
        let result = tokio::select! {
            _ = req.cancel.cancelled() => Err(AttemptError::Cancelled),
            res = self.upstream.invoke(channel, &upstream_req) => {
                res.map_err(AttemptError::Upstream)
            }
        };
        (result, start.elapsed().as_millis() as i64)
    }

    fn record_attempt(
        &self,
        req: &RelayRequest,
        generation_id: &str,
        channel_id: i64,
        attempt: u32,
        latency_ms: i64,
        result: &Result<UpstreamResponse, AttemptError>,
    ) {
        let (status_code, prompt_tokens, completion_tokens) = match result {
            Ok(response) => (
                response.status_code,
                response.prompt_tokens,
                response.completion_tokens,
            ),
            Err(AttemptError::Cancelled) => (STATUS_CLIENT_CLOSED_REQUEST, 0, 0),
            Err(AttemptError::Upstream(err)) => (err.status_code, 0, 0),
        };

        self.telemetry.record(CallMetadata {
            id: 0,
            generation_id: generation_id.to_string(),
            request_id: req.request_id.clone(),
            user_id: req.user_id,
            token_id: req.token_id,
            channel_id,
            model: req.model.clone(),
            api_path: req.api_path.clone(),
            is_stream: req.is_stream,
            status_code,
            latency_ms,
            prompt_tokens,
            completion_tokens,
            attempt,
            created_at: self.clock.now_unix(),
        });
    }

    /// Shape the final error: 429 gets a user-facing saturation notice, and
    /// every terminal message carries the request id
    fn terminal(
        &self,
        generation_id: String,
        channel: &Channel,
        latency: i64,
        mut err: UpstreamError,
        req: &RelayRequest,
    ) -> RelayOutcome {
        if err.status_code == 429 {
            err.message = SATURATED_MESSAGE.to_string();
        }
        err.message = format!("{} (request id: {})", err.message, req.request_id);

        RelayOutcome {
            generation_id,
            channel_id: Some(channel.id),
            channel_name: Some(channel.name.clone()),
            last_latency_ms: latency,
            result: Err(AppError::Upstream(err)),
        }
    }
}
