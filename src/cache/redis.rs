//! Redis cache implementation
//!
//! Backs the shared tier of the candidate cache and the Redis health repo.

use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::AppResult;

/// Redis cache wrapper
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    /// Create a new Redis cache
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;

        match value {
            Some(v) => {
                let parsed: T = serde_json::from_str(&v)?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Set a value with a TTL
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(value)?;
        let _: () = conn.set_ex(key, serialized, ttl_seconds).await?;
        Ok(())
    }

    /// Set a value without expiry
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(value)?;
        let _: () = conn.set(key, serialized).await?;
        Ok(())
    }

    /// Delete a key from cache
    pub async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// List keys matching a prefix via SCAN
    pub async fn keys_with_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        {
            let mut iter = conn.scan_match::<_, String>(pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Delete every key under a prefix (SCAN + DEL)
    pub async fn delete_prefix(&self, prefix: &str) -> AppResult<usize> {
        let keys = self.keys_with_prefix(prefix).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let count = keys.len();
        let _: () = conn.del(keys).await?;
        Ok(count)
    }
}

/// Cache key layout
pub mod keys {
    /// Candidate-list key for a (group, model) pair
    pub fn channels(group: &str, model: &str) -> String {
        format!("{CHANNELS_PREFIX}{group}:{model}")
    }

    /// Prefix covering all candidate-list keys
    pub const CHANNELS_PREFIX: &str = "router:channels:";

    /// Health row key for a channel
    pub fn health(channel_id: i64) -> String {
        format!("{HEALTH_PREFIX}{channel_id}")
    }

    /// Prefix covering all health rows
    pub const HEALTH_PREFIX: &str = "router:health:";
}
