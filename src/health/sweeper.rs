//! Background health sweeper
//!
//! Periodically ages out stale health evidence and disables channels that
//! keep failing. Runs as an independent tokio task next to the request
//! handlers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::HealthStatus;
use crate::cache::ChannelCache;
use crate::clock::SharedClock;
use crate::health::HealthStore;
use crate::source::ChannelSource;

/// Sweeper policy knobs
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub tick: Duration,
    /// Health evidence older than this is aged back to unknown
    pub stale_threshold_seconds: i64,
    /// Consecutive failures at which an unhealthy channel is auto-disabled
    pub auto_disable_consecutive_fails: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(30),
            stale_threshold_seconds: 300,
            auto_disable_consecutive_fails: 5,
        }
    }
}

/// Periodic health maintenance task
pub struct Sweeper {
    source: Arc<dyn ChannelSource>,
    health: Arc<HealthStore>,
    cache: Arc<ChannelCache>,
    clock: SharedClock,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(
        source: Arc<dyn ChannelSource>,
        health: Arc<HealthStore>,
        cache: Arc<ChannelCache>,
        clock: SharedClock,
        config: SweeperConfig,
    ) -> Self {
        Self {
            source,
            health,
            cache,
            clock,
            config,
        }
    }

    /// Spawn the sweep loop; cancel the token to stop it
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(tick_secs = self.config.tick.as_secs(), "Health sweeper started");
            let mut interval = tokio::time::interval(self.config.tick);
            // The first tick fires immediately; skip it so startup isn't
            // racing channel preload.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Health sweeper stopped");
                        return;
                    }
                    _ = interval.tick() => {
                        self.sweep_once().await;
                    }
                }
            }
        })
    }

    /// One maintenance pass over all enabled channels
    pub async fn sweep_once(&self) {
        let channels = match self.source.list_enabled().await {
            Ok(channels) => channels,
            Err(e) => {
                error!(error = %e, "Sweeper could not list channels");
                return;
            }
        };

        let now = self.clock.now_unix();
        for channel in channels {
            let row = self.health.get(channel.id).await;

            if now - row.updated_at > self.config.stale_threshold_seconds {
                debug!(
                    channel_id = channel.id,
                    age_secs = now - row.updated_at,
                    "Aging stale health evidence to unknown"
                );
                self.health.age_to_unknown(channel.id).await;
                continue;
            }

            if row.status == HealthStatus::Unhealthy
                && row.consecutive_fails >= self.config.auto_disable_consecutive_fails
            {
                error!(
                    channel_id = channel.id,
                    channel_name = %channel.name,
                    consecutive_fails = row.consecutive_fails,
                    "Auto-disabling chronically failing channel"
                );
                if let Err(e) = self.source.disable(channel.id, "auto").await {
                    error!(channel_id = channel.id, error = %e, "Auto-disable failed");
                    continue;
                }
                self.cache.invalidate(channel.id).await;
            }
        }
    }
}
