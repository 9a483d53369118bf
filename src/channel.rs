//! Channel domain types
//!
//! Channels are upstream provider endpoints owned by an external admin
//! surface; the routing core only reads them. Health state lives in its own
//! table (see [`crate::health`]).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::health::HealthStatus;
use crate::routing::strategy::StrategyKind;

/// Administrative status of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Enabled,
    ManualDisabled,
    AutoDisabled,
}

/// An upstream provider endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub status: ChannelStatus,
    /// Static weight for weighted round-robin; absent means 1
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    /// Higher priority wins under the priority strategy; absent means 0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    /// User-tier groups this channel serves
    pub groups: Vec<String>,
    /// Model identifiers this channel can relay
    pub models: Vec<String>,
    /// Configured cost per million tokens, drives the lowest-cost strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_per_mtok: Option<f64>,
    /// Upstream base URL; opaque to the core, consumed by the upstream client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Upstream credential; never logged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Channel {
    pub fn is_enabled(&self) -> bool {
        self.status == ChannelStatus::Enabled
    }

    pub fn serves(&self, group: &str, model: &str) -> bool {
        self.groups.iter().any(|g| g == group) && self.models.iter().any(|m| m == model)
    }
}

/// A routing request handed to the engine
#[derive(Debug, Clone)]
pub struct SelectRequest {
    pub request_id: String,
    pub user_id: i64,
    pub group: String,
    pub model: String,
    /// Per-request strategy override; engine default applies when absent
    pub strategy: Option<StrategyKind>,
    /// Pinned channel id; bypasses selection and disables retry
    pub specific_channel_id: Option<i64>,
    /// Channel that just failed; excluded from selection while other
    /// candidates remain
    pub exclude_channel_id: Option<i64>,
}

/// The engine's decision for one selection
#[derive(Debug, Clone)]
pub struct SelectResult {
    pub channel: Channel,
    pub reason: String,
    pub candidate_count: usize,
    pub decision_time: Duration,
}

/// A candidate channel scored with the metrics strategies select on
#[derive(Debug, Clone)]
pub struct ScoredChannel {
    pub channel: Channel,
    pub avg_latency_ms: u32,
    /// Cost per million tokens from channel configuration
    pub cost: f64,
    pub success_rate: f64,
    /// In-flight requests on this channel, process-local
    pub concurrent: i64,
    pub health: HealthStatus,
}
