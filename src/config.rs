//! Configuration management for Switchyard
//!
//! Configuration is loaded from environment variables.

use anyhow::{Context, Result};
use std::env;

use crate::routing::strategy::StrategyKind;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Redis connection URL; unset runs without the shared cache tier
    pub redis_url: Option<String>,

    /// Global retry budget for failed dispatches
    pub retry_times: u32,
    /// Default selection strategy when a request carries no override
    pub default_strategy: StrategyKind,

    /// Capacity of the in-process candidate LRU
    pub cache_lru_size: usize,
    /// TTL for candidate lists in the shared cache tier (seconds)
    pub cache_shared_ttl_seconds: u64,

    /// Sweeper tick interval (seconds)
    pub sweeper_tick_seconds: u64,
    /// Health evidence older than this is aged back to unknown (seconds)
    pub sweeper_stale_threshold_seconds: i64,
    /// Consecutive failures before the sweeper auto-disables a channel
    pub sweeper_auto_disable_consecutive_fails: u32,

    /// Connect timeout for the upstream HTTP client (seconds)
    pub upstream_connect_timeout_seconds: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("SWITCHYARD_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SWITCHYARD_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid SWITCHYARD_PORT")?,

            redis_url: env::var("REDIS_URL").ok(),

            retry_times: env::var("RETRY_TIMES")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .context("Invalid RETRY_TIMES")?,
            default_strategy: env::var("DEFAULT_STRATEGY")
                .unwrap_or_else(|_| "priority".to_string())
                .parse()
                .context("Invalid DEFAULT_STRATEGY")?,

            cache_lru_size: env::var("CACHE_LRU_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("Invalid CACHE_LRU_SIZE")?,
            cache_shared_ttl_seconds: env::var("CACHE_SHARED_TTL_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("Invalid CACHE_SHARED_TTL_SECONDS")?,

            sweeper_tick_seconds: env::var("SWEEPER_TICK_SECONDS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid SWEEPER_TICK_SECONDS")?,
            sweeper_stale_threshold_seconds: env::var("SWEEPER_STALE_THRESHOLD_SECONDS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("Invalid SWEEPER_STALE_THRESHOLD_SECONDS")?,
            sweeper_auto_disable_consecutive_fails: env::var(
                "SWEEPER_AUTO_DISABLE_CONSECUTIVE_FAILS",
            )
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("Invalid SWEEPER_AUTO_DISABLE_CONSECUTIVE_FAILS")?,

            upstream_connect_timeout_seconds: env::var("UPSTREAM_CONNECT_TIMEOUT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid UPSTREAM_CONNECT_TIMEOUT")?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            redis_url: None,
            retry_times: 0,
            default_strategy: StrategyKind::Priority,
            cache_lru_size: 1000,
            cache_shared_ttl_seconds: 60,
            sweeper_tick_seconds: 30,
            sweeper_stale_threshold_seconds: 300,
            sweeper_auto_disable_consecutive_fails: 5,
            upstream_connect_timeout_seconds: 10,
        }
    }
}
