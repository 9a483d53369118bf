//! Two-tier candidate-list cache
//!
//! Candidate lists for a (group, model) pair are cached in a bounded
//! in-process LRU, then in the optional shared tier, then loaded from the
//! channel source. Invalidation is deliberately coarse: channel edits are
//! rare relative to lookups, so any change purges the whole LRU and
//! prefix-deletes the shared keys rather than tracking which (group, model)
//! pairs a channel participates in.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::redis::keys;
use crate::cache::{InMemoryCache, RedisCache};
use crate::channel::Channel;
use crate::error::AppResult;
use crate::source::ChannelSource;

/// Shared-tier backend
pub enum SharedCacheBackend {
    Redis(Arc<RedisCache>),
    InMemory(Arc<InMemoryCache>),
}

impl SharedCacheBackend {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<Channel>>> {
        match self {
            SharedCacheBackend::Redis(cache) => cache.get(key).await,
            SharedCacheBackend::InMemory(cache) => cache.get(key).await,
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &Vec<Channel>,
        ttl_seconds: u64,
    ) -> AppResult<()> {
        match self {
            SharedCacheBackend::Redis(cache) => cache.set_with_ttl(key, value, ttl_seconds).await,
            SharedCacheBackend::InMemory(cache) => {
                cache.set_with_ttl(key, value, ttl_seconds).await
            }
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<usize> {
        match self {
            SharedCacheBackend::Redis(cache) => cache.delete_prefix(prefix).await,
            SharedCacheBackend::InMemory(cache) => cache.delete_prefix(prefix).await,
        }
    }
}

/// Cache counters exposed on the admin surface
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub local_len: usize,
    pub local_cap: usize,
    pub local_hits: u64,
    pub shared_hits: u64,
    pub source_loads: u64,
}

/// Candidate-list cache keyed by `"{group}:{model}"`
pub struct ChannelCache {
    local: Mutex<LruCache<String, Vec<Channel>>>,
    shared: Option<SharedCacheBackend>,
    source: Arc<dyn ChannelSource>,
    shared_ttl_seconds: u64,
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    source_loads: AtomicU64,
}

impl ChannelCache {
    pub fn new(
        source: Arc<dyn ChannelSource>,
        shared: Option<SharedCacheBackend>,
        lru_size: usize,
        shared_ttl_seconds: u64,
    ) -> Self {
        let cap = NonZeroUsize::new(lru_size.max(1)).unwrap();
        Self {
            local: Mutex::new(LruCache::new(cap)),
            shared,
            source,
            shared_ttl_seconds,
            local_hits: AtomicU64::new(0),
            shared_hits: AtomicU64::new(0),
            source_loads: AtomicU64::new(0),
        }
    }

    /// Candidate channels for (group, model)
    ///
    /// Lookup order: local LRU, shared tier, channel source. Shared-tier
    /// errors degrade to the next tier; a source error is the only failure
    /// surfaced.
    pub async fn get_channels(&self, group: &str, model: &str) -> AppResult<Vec<Channel>> {
        let key = format!("{group}:{model}");

        if let Some(channels) = self.local.lock().unwrap().get(&key) {
            self.local_hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Candidate cache hit (local)");
            return Ok(channels.clone());
        }

        if let Some(shared) = &self.shared {
            let shared_key = keys::channels(group, model);
            match shared.get(&shared_key).await {
                Ok(Some(channels)) => {
                    self.shared_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "Candidate cache hit (shared)");
                    self.local.lock().unwrap().put(key, channels.clone());
                    return Ok(channels);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Shared cache read failed, falling through");
                }
            }
        }

        debug!(key = %key, "Candidate cache miss, querying source");
        let channels = self.source.satisfied(group, model).await?;
        self.source_loads.fetch_add(1, Ordering::Relaxed);
        self.write_back(&key, group, model, &channels).await;
        Ok(channels)
    }

    async fn write_back(&self, key: &str, group: &str, model: &str, channels: &Vec<Channel>) {
        self.local
            .lock()
            .unwrap()
            .put(key.to_string(), channels.clone());

        if let Some(shared) = &self.shared {
            let shared_key = keys::channels(group, model);
            if let Err(e) = shared
                .set_with_ttl(&shared_key, channels, self.shared_ttl_seconds)
                .await
            {
                warn!(key = %shared_key, error = %e, "Shared cache write failed");
            }
        }
    }

    /// Purge everything after a channel change
    pub async fn invalidate(&self, channel_id: i64) {
        info!(channel_id = channel_id, "Invalidating candidate cache");
        self.purge_all().await;
    }

    /// Purge everything
    pub async fn invalidate_all(&self) {
        info!("Invalidating all candidate cache entries");
        self.purge_all().await;
    }

    async fn purge_all(&self) {
        self.local.lock().unwrap().clear();

        if let Some(shared) = &self.shared {
            match shared.delete_prefix(keys::CHANNELS_PREFIX).await {
                Ok(count) => debug!(deleted = count, "Shared candidate keys purged"),
                Err(e) => warn!(error = %e, "Shared cache purge failed"),
            }
        }
    }

    /// Warm the cache for every (group, model) pair the source knows
    pub async fn preload(&self) -> AppResult<()> {
        let enabled = self.source.list_enabled().await?;
        let mut groups: Vec<String> = enabled.iter().flat_map(|c| c.groups.clone()).collect();
        groups.sort();
        groups.dedup();

        let mut pairs = 0usize;
        for group in &groups {
            let models = match self.source.group_models(group).await {
                Ok(models) => models,
                Err(e) => {
                    warn!(group = %group, error = %e, "Failed to list models for preload");
                    continue;
                }
            };
            for model in models {
                if let Err(e) = self.get_channels(group, &model).await {
                    warn!(group = %group, model = %model, error = %e, "Preload lookup failed");
                } else {
                    pairs += 1;
                }
            }
        }

        info!(groups = groups.len(), pairs = pairs, "Candidate cache preloaded");
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let local = self.local.lock().unwrap();
        CacheStats {
            local_len: local.len(),
            local_cap: local.cap().get(),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            shared_hits: self.shared_hits.load(Ordering::Relaxed),
            source_loads: self.source_loads.load(Ordering::Relaxed),
        }
    }
}
