//! Switchyard - routing and reliability core for a model-inference gateway
//!
//! For every incoming request the core selects one upstream channel from
//! the candidate set, enforces health and priority policy, dispatches with
//! adaptive retry, maintains per-channel health statistics, and records
//! per-attempt telemetry. HTTP parsing, auth, billing and channel
//! administration live outside and are injected behind traits.

pub mod cache;
pub mod channel;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod routes;
pub mod routing;
pub mod source;
pub mod telemetry;
pub mod upstream;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

pub use crate::cache::{ChannelCache, InMemoryCache, RedisCache, SharedCacheBackend};
pub use crate::channel::{Channel, ChannelStatus, SelectRequest, SelectResult};
pub use crate::clock::{Clock, SystemClock};
pub use crate::config::Config;
pub use crate::dispatch::{ConcurrencyGauge, Dispatcher, RelayOutcome, RelayRequest};
pub use crate::error::{AppError, AppResult};
pub use crate::health::{HealthStatus, HealthStore, Sweeper, SweeperConfig};
pub use crate::routing::{Engine, StrategyKind, StrategyRegistry};
pub use crate::source::{ChannelSource, InMemoryChannelSource};
pub use crate::telemetry::{TelemetryRepo, TelemetrySink};
pub use crate::upstream::{HttpUpstream, Upstream};

/// Application state shared across all request handlers
pub struct RouterState {
    pub config: Config,
    pub start_time: Instant,
    pub source: Arc<dyn ChannelSource>,
    pub cache: Arc<ChannelCache>,
    pub health: Arc<HealthStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub telemetry: Arc<TelemetrySink>,
}

impl RouterState {
    /// Build the production stack
    ///
    /// Channels, upstream invocation and telemetry storage are injected;
    /// everything in between (caches, health store, engine, dispatcher,
    /// sweeper wiring) is assembled here. With `redis_url` configured the
    /// candidate cache gains its shared tier and health rows persist in
    /// Redis; without it everything stays in-process.
    pub async fn new(
        config: Config,
        source: Arc<dyn ChannelSource>,
        upstream: Arc<dyn Upstream>,
        telemetry_repo: Arc<dyn TelemetryRepo>,
    ) -> Result<Self> {
        let clock: clock::SharedClock = Arc::new(SystemClock);

        let (shared_backend, health_repo): (
            Option<SharedCacheBackend>,
            Arc<dyn health::HealthRepo>,
        ) = match &config.redis_url {
            Some(url) => {
                let client = redis::Client::open(url.as_str())?;
                let conn = redis::aio::ConnectionManager::new(client).await?;
                let shared = SharedCacheBackend::Redis(Arc::new(RedisCache::new(conn.clone())));
                let repo = Arc::new(health::RedisHealthRepo::new(RedisCache::new(conn)));
                (Some(shared), repo as Arc<dyn health::HealthRepo>)
            }
            None => (None, Arc::new(health::InMemoryHealthRepo::new())),
        };

        let cache = Arc::new(ChannelCache::new(
            source.clone(),
            shared_backend,
            config.cache_lru_size,
            config.cache_shared_ttl_seconds,
        ));

        let health = Arc::new(HealthStore::new(health_repo, clock.clone()));
        let registry = Arc::new(StrategyRegistry::new());
        let concurrency = Arc::new(ConcurrencyGauge::new());

        let engine = Arc::new(Engine::new(
            cache.clone(),
            health.clone(),
            source.clone(),
            registry.clone(),
            concurrency.clone(),
            config.default_strategy,
        ));

        let telemetry = Arc::new(TelemetrySink::new(telemetry_repo, 10_000));

        let dispatcher = Arc::new(Dispatcher::new(
            engine,
            source.clone(),
            health.clone(),
            registry,
            telemetry.clone(),
            upstream,
            cache.clone(),
            concurrency,
            clock,
            config.retry_times,
        ));

        Ok(Self {
            config,
            start_time: Instant::now(),
            source,
            cache,
            health,
            dispatcher,
            telemetry,
        })
    }

    /// Sweeper wired against this state's components
    pub fn sweeper(&self, clock: clock::SharedClock) -> Sweeper {
        Sweeper::new(
            self.source.clone(),
            self.health.clone(),
            self.cache.clone(),
            clock,
            SweeperConfig {
                tick: std::time::Duration::from_secs(self.config.sweeper_tick_seconds),
                stale_threshold_seconds: self.config.sweeper_stale_threshold_seconds,
                auto_disable_consecutive_fails: self.config.sweeper_auto_disable_consecutive_fails,
            },
        )
    }
}
