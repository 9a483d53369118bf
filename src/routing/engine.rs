//! Routing engine
//!
//! Orchestrates one selection: candidate lookup through the cache, status
//! and health filtering, metrics load, then the strategy pick. Selection is
//! CPU-only once the candidate set and health rows are in hand.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::ChannelCache;
use crate::channel::{Channel, ScoredChannel, SelectRequest, SelectResult};
use crate::dispatch::ConcurrencyGauge;
use crate::error::{AppError, AppResult};
use crate::health::{HealthStatus, HealthStore};
use crate::routing::strategy::{StrategyKind, StrategyRegistry};
use crate::source::ChannelSource;

/// One routing decision, emitted asynchronously for auditing
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub request_id: String,
    pub timestamp: i64,
    pub user_id: i64,
    pub group: String,
    pub model: String,
    pub strategy: String,
    pub candidate_count: usize,
    pub selected_channel_id: i64,
    pub reason: String,
    pub attempt: u32,
    pub result: String,
    pub decision_time_ms: u64,
}

/// Channel selection engine
pub struct Engine {
    cache: Arc<ChannelCache>,
    health: Arc<HealthStore>,
    source: Arc<dyn ChannelSource>,
    registry: Arc<StrategyRegistry>,
    concurrency: Arc<ConcurrencyGauge>,
    default_strategy: StrategyKind,
}

impl Engine {
    pub fn new(
        cache: Arc<ChannelCache>,
        health: Arc<HealthStore>,
        source: Arc<dyn ChannelSource>,
        registry: Arc<StrategyRegistry>,
        concurrency: Arc<ConcurrencyGauge>,
        default_strategy: StrategyKind,
    ) -> Self {
        Self {
            cache,
            health,
            source,
            registry,
            concurrency,
            default_strategy,
        }
    }

    /// Select a channel for the request
    pub async fn select(&self, req: &SelectRequest) -> AppResult<SelectResult> {
        let start = Instant::now();

        let candidates = self.candidate_channels(&req.group, &req.model).await?;
        if candidates.is_empty() {
            return Err(AppError::NoCandidates {
                group: req.group.clone(),
                model: req.model.clone(),
            });
        }
        debug!(
            group = %req.group,
            model = %req.model,
            candidates = candidates.len(),
            "Found candidate channels"
        );

        let mut routable = self.filter_routable(&candidates).await;
        if routable.is_empty() {
            // No healthy channel; give untried channels a turn but keep
            // unhealthy ones out.
            warn!(
                group = %req.group,
                model = %req.model,
                "No healthy channels, trying unknown-status channels"
            );
            routable = self.filter_unknown(&candidates).await;
            if routable.is_empty() {
                return Err(AppError::NoHealthy {
                    group: req.group.clone(),
                    model: req.model.clone(),
                });
            }
        }

        // Keep a retry away from the channel that just failed, unless it is
        // the only one left.
        if let Some(excluded) = req.exclude_channel_id {
            let remaining: Vec<Channel> = routable
                .iter()
                .filter(|c| c.id != excluded)
                .cloned()
                .collect();
            if !remaining.is_empty() {
                routable = remaining;
            }
        }

        let scored = self.load_metrics(routable).await;

        let kind = req.strategy.unwrap_or(self.default_strategy);
        let strategy = self.registry.get(kind);

        let chosen = strategy
            .select(&scored)
            .ok_or_else(|| AppError::StrategyFailure(kind.as_str().to_string()))?;

        let result = SelectResult {
            channel: chosen,
            reason: format!("Selected by {} strategy", strategy.name()),
            candidate_count: candidates.len(),
            decision_time: start.elapsed(),
        };

        debug!(
            channel_id = result.channel.id,
            group = %req.group,
            model = %req.model,
            strategy = strategy.name(),
            decision_time_us = result.decision_time.as_micros() as u64,
            "Selected channel"
        );

        self.log_decision(req, &result, kind);

        Ok(result)
    }

    async fn candidate_channels(&self, group: &str, model: &str) -> AppResult<Vec<Channel>> {
        match self.cache.get_channels(group, model).await {
            Ok(channels) => Ok(channels),
            Err(e) => {
                // Cache path failed somewhere; go straight at the source
                warn!(group = %group, model = %model, error = %e, "Candidate cache failed, querying source directly");
                self.source.satisfied(group, model).await
            }
        }
    }

    async fn filter_routable(&self, candidates: &[Channel]) -> Vec<Channel> {
        let mut routable = Vec::with_capacity(candidates.len());
        for channel in candidates {
            if channel.is_enabled() && self.health.is_healthy(channel.id).await {
                routable.push(channel.clone());
            }
        }
        routable
    }

    async fn filter_unknown(&self, candidates: &[Channel]) -> Vec<Channel> {
        let mut unknown = Vec::new();
        for channel in candidates {
            if !channel.is_enabled() {
                continue;
            }
            if self.health.get(channel.id).await.status == HealthStatus::Unknown {
                unknown.push(channel.clone());
            }
        }
        unknown
    }

    async fn load_metrics(&self, channels: Vec<Channel>) -> Vec<ScoredChannel> {
        let mut scored = Vec::with_capacity(channels.len());
        for channel in channels {
            let row = self.health.get(channel.id).await;
            let cost = channel.cost_per_mtok.unwrap_or(0.0);
            scored.push(ScoredChannel {
                avg_latency_ms: row.avg_latency,
                cost,
                success_rate: row.success_rate(),
                concurrent: self.concurrency.get(channel.id),
                health: row.status,
                channel,
            });
        }
        scored
    }

    /// Emit the decision record off the hot path
    fn log_decision(&self, req: &SelectRequest, result: &SelectResult, kind: StrategyKind) {
        let decision = RoutingDecision {
            request_id: req.request_id.clone(),
            timestamp: chrono::Utc::now().timestamp(),
            user_id: req.user_id,
            group: req.group.clone(),
            model: req.model.clone(),
            strategy: kind.as_str().to_string(),
            candidate_count: result.candidate_count,
            selected_channel_id: result.channel.id,
            reason: result.reason.clone(),
            attempt: 0,
            result: "success".to_string(),
            decision_time_ms: result.decision_time.as_millis() as u64,
        };
        tokio::spawn(async move {
            match serde_json::to_string(&decision) {
                Ok(json) => debug!(decision = %json, "Routing decision"),
                Err(e) => debug!(error = %e, "Failed to serialize routing decision"),
            }
        });
    }
}
