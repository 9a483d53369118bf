//! Channel source of truth
//!
//! Channels are administered outside the routing core (admin UI, database).
//! The core consumes them through [`ChannelSource`]; the in-memory
//! implementation backs tests and single-node deployments where channels
//! are loaded from static configuration.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::channel::{Channel, ChannelStatus};
use crate::error::AppResult;

/// Source-of-truth queries and the disable hook
#[async_trait]
pub trait ChannelSource: Send + Sync {
    /// All channels serving (group, model), regardless of status.
    ///
    /// Callers check `status` at use time; candidate lists are cached and
    /// may be stale.
    async fn satisfied(&self, group: &str, model: &str) -> AppResult<Vec<Channel>>;

    /// Look up one channel by id
    async fn by_id(&self, channel_id: i64) -> AppResult<Option<Channel>>;

    /// All currently enabled channels
    async fn list_enabled(&self) -> AppResult<Vec<Channel>>;

    /// Models reachable from a group, for cache preloading
    async fn group_models(&self, group: &str) -> AppResult<Vec<String>>;

    /// Disable a channel; `reason = "auto"` marks it auto-disabled
    async fn disable(&self, channel_id: i64, reason: &str) -> AppResult<()>;
}

/// In-memory channel table
pub struct InMemoryChannelSource {
    channels: RwLock<HashMap<i64, Channel>>,
}

impl InMemoryChannelSource {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self {
            channels: RwLock::new(channels.into_iter().map(|c| (c.id, c)).collect()),
        }
    }

    pub async fn upsert(&self, channel: Channel) {
        self.channels.write().await.insert(channel.id, channel);
    }
}

#[async_trait]
impl ChannelSource for InMemoryChannelSource {
    async fn satisfied(&self, group: &str, model: &str) -> AppResult<Vec<Channel>> {
        let channels = self.channels.read().await;
        let mut matched: Vec<Channel> = channels
            .values()
            .filter(|c| c.serves(group, model))
            .cloned()
            .collect();
        matched.sort_by_key(|c| c.id);
        Ok(matched)
    }

    async fn by_id(&self, channel_id: i64) -> AppResult<Option<Channel>> {
        Ok(self.channels.read().await.get(&channel_id).cloned())
    }

    async fn list_enabled(&self) -> AppResult<Vec<Channel>> {
        let channels = self.channels.read().await;
        let mut enabled: Vec<Channel> = channels
            .values()
            .filter(|c| c.is_enabled())
            .cloned()
            .collect();
        enabled.sort_by_key(|c| c.id);
        Ok(enabled)
    }

    async fn group_models(&self, group: &str) -> AppResult<Vec<String>> {
        let channels = self.channels.read().await;
        let mut models: Vec<String> = channels
            .values()
            .filter(|c| c.groups.iter().any(|g| g == group))
            .flat_map(|c| c.models.iter().cloned())
            .collect();
        models.sort();
        models.dedup();
        Ok(models)
    }

    async fn disable(&self, channel_id: i64, reason: &str) -> AppResult<()> {
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get_mut(&channel_id) {
            channel.status = if reason == "auto" {
                ChannelStatus::AutoDisabled
            } else {
                ChannelStatus::ManualDisabled
            };
            info!(
                channel_id = channel_id,
                channel_name = %channel.name,
                reason = %reason,
                "Channel disabled"
            );
        }
        Ok(())
    }
}
