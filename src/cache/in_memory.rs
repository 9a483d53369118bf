//! In-memory cache implementation
//!
//! Stands in for Redis during tests and in deployments that run without a
//! shared cache tier. Same API shape as [`super::RedisCache`] so the two
//! substitute behind the backend enum.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::AppResult;

/// Entry with optional expiration
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() > exp)
            .unwrap_or(false)
    }
}

/// In-memory cache
///
/// Uses RwLock for interior mutability, allowing concurrent reads.
pub struct InMemoryCache {
    data: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let data = self.data.read().unwrap();

        match data.get(key) {
            Some(entry) if !entry.is_expired() => {
                let parsed: T = serde_json::from_str(&entry.value)?;
                Ok(Some(parsed))
            }
            _ => Ok(None),
        }
    }

    /// Set a value with a TTL
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> AppResult<()> {
        let serialized = serde_json::to_string(value)?;
        let expires_at = if ttl_seconds > 0 {
            Some(Instant::now() + Duration::from_secs(ttl_seconds))
        } else {
            None
        };

        let mut data = self.data.write().unwrap();
        data.insert(
            key.to_string(),
            CacheEntry {
                value: serialized,
                expires_at,
            },
        );
        Ok(())
    }

    /// Set a value without expiry
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        self.set_with_ttl(key, value, 0).await
    }

    /// Delete a key from cache
    pub async fn delete(&self, key: &str) -> AppResult<()> {
        let mut data = self.data.write().unwrap();
        data.remove(key);
        Ok(())
    }

    /// List keys matching a prefix
    pub async fn keys_with_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        let data = self.data.read().unwrap();
        Ok(data
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired())
            .map(|(k, _)| k.clone())
            .collect())
    }

    /// Delete every key under a prefix
    pub async fn delete_prefix(&self, prefix: &str) -> AppResult<usize> {
        let mut data = self.data.write().unwrap();
        let before = data.len();
        data.retain(|k, _| !k.starts_with(prefix));
        Ok(before - data.len())
    }

    /// Clear all entries (useful for test isolation)
    pub fn clear(&self) {
        let mut data = self.data.write().unwrap();
        data.clear();
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}
