//! Per-channel health bookkeeping
//!
//! Every channel accumulates success/failure counters and a derived status.
//! The store applies the transition rules, the repo persists rows, and the
//! sweeper ages stale evidence and auto-disables chronic failers.

pub mod repo;
pub mod store;
pub mod sweeper;

use serde::{Deserialize, Serialize};

pub use repo::{ChannelHealth, HealthRepo, InMemoryHealthRepo, RedisHealthRepo};
pub use store::HealthStore;
pub use sweeper::{Sweeper, SweeperConfig};

/// Derived health status of a channel
///
/// `Unknown` is the optimistic default: channels with no evidence yet (or
/// whose evidence has aged out) get a chance to serve traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    /// Whether routing should consider this channel
    pub fn is_routable(self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Unknown)
    }
}
