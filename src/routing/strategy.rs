//! Selection strategies
//!
//! Every strategy picks one channel from a non-empty candidate list that has
//! already been filtered for status and health. Stateful strategies (smooth
//! WRR, round-robin) keep per-process state behind a mutex; selection never
//! awaits while holding it.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::{Channel, ScoredChannel};

/// Strategy identifiers, as accepted in configuration and request overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[serde(rename = "weight_rr")]
    WeightRoundRobin,
    Priority,
    LowestCost,
    LowestLatency,
    RoundRobin,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::WeightRoundRobin => "weight_rr",
            StrategyKind::Priority => "priority",
            StrategyKind::LowestCost => "lowest_cost",
            StrategyKind::LowestLatency => "lowest_latency",
            StrategyKind::RoundRobin => "round_robin",
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown strategy: {0}")]
pub struct UnknownStrategy(String);

impl FromStr for StrategyKind {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weight_rr" => Ok(StrategyKind::WeightRoundRobin),
            "priority" => Ok(StrategyKind::Priority),
            "lowest_cost" => Ok(StrategyKind::LowestCost),
            "lowest_latency" => Ok(StrategyKind::LowestLatency),
            "round_robin" => Ok(StrategyKind::RoundRobin),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// A selection algorithm
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pick a channel; `None` only when the candidate list is empty
    fn select(&self, candidates: &[ScoredChannel]) -> Option<Channel>;

    /// Dispatch outcome feedback; default is a no-op
    fn on_success(&self, _channel_id: i64) {}
    fn on_failure(&self, _channel_id: i64) {}
}

/// How many of the cheapest/fastest channels the randomised pick spreads over
const TOP_N_SPREAD: usize = 3;

/// Per-channel smooth WRR state
#[derive(Debug)]
struct WeightedChannel {
    /// Static weight from channel configuration
    weight: i64,
    current_weight: i64,
    /// Decayed on failure, recovered on success; clamped to `[1, weight]`
    effective_weight: i64,
}

/// Smooth weighted round-robin
///
/// Distributes load proportionally to weight without clustering picks of the
/// heaviest channel. Failure feedback decays a channel's effective weight by
/// one per failure; success restores it by one, up to the static weight.
pub struct WeightRoundRobinStrategy {
    state: Mutex<HashMap<i64, WeightedChannel>>,
}

impl WeightRoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for WeightRoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for WeightRoundRobinStrategy {
    fn name(&self) -> &'static str {
        StrategyKind::WeightRoundRobin.as_str()
    }

    fn select(&self, candidates: &[ScoredChannel]) -> Option<Channel> {
        if candidates.is_empty() {
            return None;
        }

        let mut state = self.state.lock().unwrap();

        // Drop state for channels no longer in the candidate set; they
        // re-enter fresh if they come back.
        let current_ids: Vec<i64> = candidates.iter().map(|c| c.channel.id).collect();
        state.retain(|id, _| current_ids.contains(id));

        let mut total_weight = 0i64;
        let mut selected: Option<(i64, i64)> = None; // (channel_id, current_weight)

        for candidate in candidates {
            let weight = i64::from(candidate.channel.weight.unwrap_or(1).max(1));
            let entry = state
                .entry(candidate.channel.id)
                .or_insert_with(|| WeightedChannel {
                    weight,
                    current_weight: 0,
                    effective_weight: weight,
                });

            entry.current_weight += entry.effective_weight;
            total_weight += entry.effective_weight;

            match selected {
                Some((_, best)) if entry.current_weight <= best => {}
                _ => selected = Some((candidate.channel.id, entry.current_weight)),
            }
        }

        let (chosen_id, _) = selected?;
        if let Some(entry) = state.get_mut(&chosen_id) {
            entry.current_weight -= total_weight;
        }

        candidates
            .iter()
            .find(|c| c.channel.id == chosen_id)
            .map(|c| c.channel.clone())
    }

    fn on_success(&self, channel_id: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.get_mut(&channel_id) {
            if entry.effective_weight < entry.weight {
                entry.effective_weight += 1;
            }
        }
    }

    fn on_failure(&self, channel_id: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.get_mut(&channel_id) {
            entry.effective_weight = (entry.effective_weight - 1).max(1);
        }
    }
}

/// Highest priority wins; ties break uniformly at random
pub struct PriorityStrategy;

impl Strategy for PriorityStrategy {
    fn name(&self) -> &'static str {
        StrategyKind::Priority.as_str()
    }

    fn select(&self, candidates: &[ScoredChannel]) -> Option<Channel> {
        if candidates.is_empty() {
            return None;
        }

        let max_priority = candidates
            .iter()
            .map(|c| c.channel.priority.unwrap_or(0))
            .max()?;
        let top: Vec<&ScoredChannel> = candidates
            .iter()
            .filter(|c| c.channel.priority.unwrap_or(0) == max_priority)
            .collect();

        let index = rand::rng().random_range(0..top.len());
        Some(top[index].channel.clone())
    }
}

/// Cheapest first, randomised over the top three to avoid hotspotting
pub struct LowestCostStrategy;

impl Strategy for LowestCostStrategy {
    fn name(&self) -> &'static str {
        StrategyKind::LowestCost.as_str()
    }

    fn select(&self, candidates: &[ScoredChannel]) -> Option<Channel> {
        if candidates.is_empty() {
            return None;
        }

        let mut sorted: Vec<&ScoredChannel> = candidates.iter().collect();
        sorted.sort_by(|a, b| a.cost.total_cmp(&b.cost));

        let top_n = TOP_N_SPREAD.min(sorted.len());
        let index = rand::rng().random_range(0..top_n);
        Some(sorted[index].channel.clone())
    }
}

/// Fastest first, randomised over the top three to avoid hotspotting
pub struct LowestLatencyStrategy;

impl Strategy for LowestLatencyStrategy {
    fn name(&self) -> &'static str {
        StrategyKind::LowestLatency.as_str()
    }

    fn select(&self, candidates: &[ScoredChannel]) -> Option<Channel> {
        if candidates.is_empty() {
            return None;
        }

        let mut sorted: Vec<&ScoredChannel> = candidates.iter().collect();
        sorted.sort_by_key(|c| c.avg_latency_ms);

        let top_n = TOP_N_SPREAD.min(sorted.len());
        let index = rand::rng().random_range(0..top_n);
        Some(sorted[index].channel.clone())
    }
}

/// Plain rotation over the candidate list
///
/// The counter is per-process; multiple instances rotate independently.
pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        StrategyKind::RoundRobin.as_str()
    }

    fn select(&self, candidates: &[ScoredChannel]) -> Option<Channel> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[index].channel.clone())
    }
}

/// Strategy lookup table; unknown kinds fall back to priority
pub struct StrategyRegistry {
    strategies: HashMap<StrategyKind, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        let mut strategies: HashMap<StrategyKind, Arc<dyn Strategy>> = HashMap::new();
        strategies.insert(
            StrategyKind::WeightRoundRobin,
            Arc::new(WeightRoundRobinStrategy::new()),
        );
        strategies.insert(StrategyKind::Priority, Arc::new(PriorityStrategy));
        strategies.insert(StrategyKind::LowestCost, Arc::new(LowestCostStrategy));
        strategies.insert(StrategyKind::LowestLatency, Arc::new(LowestLatencyStrategy));
        strategies.insert(StrategyKind::RoundRobin, Arc::new(RoundRobinStrategy::new()));
        Self { strategies }
    }

    pub fn get(&self, kind: StrategyKind) -> Arc<dyn Strategy> {
        self.strategies
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| self.strategies[&StrategyKind::Priority].clone())
    }

    /// Fan dispatch feedback out to every stateful strategy
    pub fn on_success(&self, channel_id: i64) {
        for strategy in self.strategies.values() {
            strategy.on_success(channel_id);
        }
    }

    pub fn on_failure(&self, channel_id: i64) {
        for strategy in self.strategies.values() {
            strategy.on_failure(channel_id);
        }
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
