//! Health row persistence
//!
//! One row per channel, full-row upserts. Concurrent writers may lose
//! counter updates in the read-modify-write window; the policy thresholds
//! are coarse enough that this is accepted.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::HealthStatus;
use crate::cache::redis::keys;
use crate::cache::RedisCache;
use crate::error::AppResult;

/// Persisted health record for one channel
///
/// Field names are stable; reporting tools read these rows directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelHealth {
    pub channel_id: i64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_fails: u32,
    pub last_success_at: i64,
    pub last_failure_at: i64,
    /// Exponentially-smoothed latency in milliseconds
    pub avg_latency: u32,
    pub status: HealthStatus,
    pub updated_at: i64,
}

impl ChannelHealth {
    /// Fresh row for a channel never seen before
    pub fn unknown(channel_id: i64, now: i64) -> Self {
        Self {
            channel_id,
            success_count: 0,
            failure_count: 0,
            consecutive_fails: 0,
            last_success_at: 0,
            last_failure_at: 0,
            avg_latency: 0,
            status: HealthStatus::Unknown,
            updated_at: now,
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Success ratio over all observed requests; 1.0 with no evidence
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }
}

/// Health row store
#[async_trait]
pub trait HealthRepo: Send + Sync {
    async fn fetch(&self, channel_id: i64) -> AppResult<Option<ChannelHealth>>;
    async fn save(&self, row: &ChannelHealth) -> AppResult<()>;
    async fn all(&self) -> AppResult<Vec<ChannelHealth>>;
    /// Delete rows whose `updated_at` is before the threshold; returns count
    async fn delete_updated_before(&self, threshold: i64) -> AppResult<usize>;
}

/// RwLock-backed row store for tests and Redis-less deployments
pub struct InMemoryHealthRepo {
    rows: RwLock<HashMap<i64, ChannelHealth>>,
}

impl InMemoryHealthRepo {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryHealthRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthRepo for InMemoryHealthRepo {
    async fn fetch(&self, channel_id: i64) -> AppResult<Option<ChannelHealth>> {
        Ok(self.rows.read().unwrap().get(&channel_id).cloned())
    }

    async fn save(&self, row: &ChannelHealth) -> AppResult<()> {
        self.rows
            .write()
            .unwrap()
            .insert(row.channel_id, row.clone());
        Ok(())
    }

    async fn all(&self) -> AppResult<Vec<ChannelHealth>> {
        let mut rows: Vec<ChannelHealth> = self.rows.read().unwrap().values().cloned().collect();
        rows.sort_by_key(|r| r.channel_id);
        Ok(rows)
    }

    async fn delete_updated_before(&self, threshold: i64) -> AppResult<usize> {
        let mut rows = self.rows.write().unwrap();
        let before = rows.len();
        rows.retain(|_, r| r.updated_at >= threshold);
        Ok(before - rows.len())
    }
}

/// Redis-backed row store; rows live at `router:health:{id}` without TTL
pub struct RedisHealthRepo {
    cache: RedisCache,
}

impl RedisHealthRepo {
    pub fn new(cache: RedisCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl HealthRepo for RedisHealthRepo {
    async fn fetch(&self, channel_id: i64) -> AppResult<Option<ChannelHealth>> {
        self.cache.get(&keys::health(channel_id)).await
    }

    async fn save(&self, row: &ChannelHealth) -> AppResult<()> {
        self.cache.set(&keys::health(row.channel_id), row).await
    }

    async fn all(&self) -> AppResult<Vec<ChannelHealth>> {
        let keys = self.cache.keys_with_prefix(keys::HEALTH_PREFIX).await?;
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(row) = self.cache.get::<ChannelHealth>(&key).await? {
                rows.push(row);
            }
        }
        rows.sort_by_key(|r| r.channel_id);
        Ok(rows)
    }

    async fn delete_updated_before(&self, threshold: i64) -> AppResult<usize> {
        let rows = self.all().await?;
        let mut deleted = 0;
        for row in rows {
            if row.updated_at < threshold {
                self.cache.delete(&keys::health(row.channel_id)).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
