//! Health state transitions
//!
//! Implements the bookkeeping rules over a [`HealthRepo`]. All writes are
//! best-effort: a repo failure is logged and swallowed so the request path
//! never blocks on health persistence.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::repo::{ChannelHealth, HealthRepo};
use super::HealthStatus;
use crate::clock::SharedClock;

/// Smoothing factor for the latency moving average
const LATENCY_EMA_ALPHA: f64 = 0.2;

/// Consecutive failures before a channel turns unhealthy
const UNHEALTHY_CONSECUTIVE_FAILS: u32 = 3;
/// Minimum sample size before the failure-rate rule applies
const UNHEALTHY_MIN_REQUESTS: u64 = 10;
/// Failure rate above which a channel turns unhealthy
const UNHEALTHY_FAILURE_RATE: f64 = 0.1;
/// Success rate required for an unhealthy channel to recover
const RECOVERY_SUCCESS_RATE: f64 = 0.9;

/// Per-channel health store
pub struct HealthStore {
    repo: Arc<dyn HealthRepo>,
    clock: SharedClock,
}

impl HealthStore {
    pub fn new(repo: Arc<dyn HealthRepo>, clock: SharedClock) -> Self {
        Self { repo, clock }
    }

    /// Current row for a channel, upserting a fresh `unknown` row on first
    /// observation. Repo errors degrade to an in-memory default.
    pub async fn get(&self, channel_id: i64) -> ChannelHealth {
        let now = self.clock.now_unix();
        match self.repo.fetch(channel_id).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                let row = ChannelHealth::unknown(channel_id, now);
                self.persist(&row).await;
                row
            }
            Err(e) => {
                error!(channel_id = channel_id, error = %e, "Health fetch failed");
                ChannelHealth::unknown(channel_id, now)
            }
        }
    }

    /// Record a successful request
    pub async fn on_success(&self, channel_id: i64, latency_ms: u32) {
        let mut row = self.get(channel_id).await;
        let now = self.clock.now_unix();

        row.success_count += 1;
        row.last_success_at = now;
        row.consecutive_fails = 0;

        row.avg_latency = if row.avg_latency == 0 {
            latency_ms
        } else {
            (LATENCY_EMA_ALPHA * latency_ms as f64
                + (1.0 - LATENCY_EMA_ALPHA) * row.avg_latency as f64) as u32
        };

        if row.status == HealthStatus::Unhealthy
            && row.success_rate() > RECOVERY_SUCCESS_RATE
            && row.consecutive_fails == 0
        {
            row.status = HealthStatus::Healthy;
            info!(channel_id = channel_id, "Channel recovered to healthy");
        }

        row.updated_at = now;
        self.persist(&row).await;
    }

    /// Record a failed request
    pub async fn on_failure(&self, channel_id: i64, error_code: &str) {
        let mut row = self.get(channel_id).await;
        let now = self.clock.now_unix();

        row.failure_count += 1;
        row.last_failure_at = now;
        row.consecutive_fails += 1;

        if row.consecutive_fails >= UNHEALTHY_CONSECUTIVE_FAILS {
            if row.status != HealthStatus::Unhealthy {
                warn!(
                    channel_id = channel_id,
                    consecutive_fails = row.consecutive_fails,
                    error_code = %error_code,
                    "Channel marked unhealthy (consecutive failures)"
                );
            }
            row.status = HealthStatus::Unhealthy;
        }

        if row.total_requests() >= UNHEALTHY_MIN_REQUESTS {
            let failure_rate = row.failure_count as f64 / row.total_requests() as f64;
            if failure_rate > UNHEALTHY_FAILURE_RATE {
                if row.status != HealthStatus::Unhealthy {
                    warn!(
                        channel_id = channel_id,
                        failure_rate = failure_rate,
                        error_code = %error_code,
                        "Channel marked unhealthy (failure rate)"
                    );
                }
                row.status = HealthStatus::Unhealthy;
            }
        }

        row.updated_at = now;
        self.persist(&row).await;
    }

    /// Whether routing should consider this channel
    ///
    /// Optimistic: a channel with no row yet counts as healthy. A repo
    /// error counts as unhealthy.
    pub async fn is_healthy(&self, channel_id: i64) -> bool {
        match self.repo.fetch(channel_id).await {
            Ok(Some(row)) => row.status.is_routable(),
            Ok(None) => true,
            Err(e) => {
                error!(channel_id = channel_id, error = %e, "Health fetch failed");
                false
            }
        }
    }

    /// Zero the counters and return the channel to `unknown`
    pub async fn reset(&self, channel_id: i64) {
        let row = ChannelHealth::unknown(channel_id, self.clock.now_unix());
        self.persist(&row).await;
        info!(channel_id = channel_id, "Channel health reset");
    }

    /// Age a channel's evidence back to `unknown` (sweeper hook)
    pub async fn age_to_unknown(&self, channel_id: i64) {
        let mut row = self.get(channel_id).await;
        if row.status == HealthStatus::Unknown {
            return;
        }
        row.status = HealthStatus::Unknown;
        row.updated_at = self.clock.now_unix();
        self.persist(&row).await;
        debug!(channel_id = channel_id, "Health evidence aged out");
    }

    /// Ids of channels whose status permits routing
    pub async fn list_healthy(&self) -> Vec<i64> {
        match self.repo.all().await {
            Ok(rows) => rows
                .into_iter()
                .filter(|r| r.status.is_routable())
                .map(|r| r.channel_id)
                .collect(),
            Err(e) => {
                error!(error = %e, "Health listing failed");
                Vec::new()
            }
        }
    }

    /// Delete rows not updated in the last `days` days; returns count
    pub async fn cleanup_older_than(&self, days: i64) -> usize {
        let threshold = self.clock.now_unix() - days * 86_400;
        match self.repo.delete_updated_before(threshold).await {
            Ok(count) => {
                if count > 0 {
                    info!(days = days, deleted = count, "Aged health rows removed");
                }
                count
            }
            Err(e) => {
                error!(error = %e, "Health cleanup failed");
                0
            }
        }
    }

    async fn persist(&self, row: &ChannelHealth) {
        if let Err(e) = self.repo.save(row).await {
            error!(channel_id = row.channel_id, error = %e, "Health save failed");
        }
    }
}
