//! Channel selection
//!
//! The engine narrows the candidate set (cache lookup, status filter,
//! health filter, metrics load) and hands the survivors to a pluggable
//! strategy for the final pick.

pub mod engine;
pub mod strategy;

pub use engine::{Engine, RoutingDecision};
pub use strategy::{Strategy, StrategyKind, StrategyRegistry};
