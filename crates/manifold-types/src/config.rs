//! Routing configuration schema.
//!
//! The embedding application owns configuration *loading*; this crate only
//! defines the shape its routing section deserializes into. All fields
//! support both `snake_case` and `camelCase` names via `#[serde(alias)]`,
//! and unknown fields are ignored for forward compatibility.

use serde::{Deserialize, Serialize};

use crate::aliases::ModelAliases;

// ── RouterConfig ───────────────────────────────────────────────────────

/// Top-level routing configuration.
///
/// `daily_budget_usd` bounds spend against the usage tracker's cumulative
/// cost. The tracker accumulates from construction (or the last explicit
/// reset); the embedding application is expected to call the tracker's
/// `reset()` on its own day boundary -- the routing core does not own a
/// reset schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Whether smart routing is enabled. When `false`, requests go straight
    /// to the sonnet-tier model with no analysis, fallback, or learning.
    #[serde(default = "default_smart_routing", alias = "smartRouting")]
    pub smart_routing: bool,

    /// Daily spending budget in USD. `0.0` = unlimited.
    #[serde(default, alias = "dailyBudgetUsd")]
    pub daily_budget_usd: f64,

    /// Tier-to-model alias map.
    #[serde(default)]
    pub aliases: ModelAliases,

    /// Minimum confidence for a pattern-cluster signal to participate in
    /// the merged routing decision. Auto-tuned at runtime within
    /// `[0.2, 0.8]`; this is the starting point.
    #[serde(default = "default_confidence_threshold", alias = "confidenceThreshold")]
    pub confidence_threshold: f64,

    /// How many recent session messages count toward the input-token
    /// estimate handed to the selector.
    #[serde(default = "default_recent_message_limit", alias = "recentMessageLimit")]
    pub recent_message_limit: usize,

    /// Batch queue and processor settings.
    #[serde(default)]
    pub batch: BatchConfig,
}

fn default_smart_routing() -> bool {
    true
}

fn default_confidence_threshold() -> f64 {
    0.4
}

fn default_recent_message_limit() -> usize {
    10
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            smart_routing: default_smart_routing(),
            daily_budget_usd: 0.0,
            aliases: ModelAliases::default(),
            confidence_threshold: default_confidence_threshold(),
            recent_message_limit: default_recent_message_limit(),
            batch: BatchConfig::default(),
        }
    }
}

// ── BatchConfig ────────────────────────────────────────────────────────

/// Batch queue and background processor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum queued requests. `0` = unlimited.
    #[serde(default, alias = "maxSize")]
    pub max_size: usize,

    /// Processor tick interval in milliseconds.
    #[serde(default = "default_poll_interval_ms", alias = "pollIntervalMs")]
    pub poll_interval_ms: u64,

    /// Maximum in-flight batch workers.
    #[serde(default = "default_max_concurrent", alias = "maxConcurrent")]
    pub max_concurrent: usize,

    /// Default request TTL in milliseconds, applied only when a request
    /// carries no explicit deadline. `0` = no default expiry.
    #[serde(default = "default_ttl_ms", alias = "defaultTtlMs")]
    pub default_ttl_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_max_concurrent() -> usize {
    1
}

fn default_ttl_ms() -> u64 {
    3_600_000
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 0,
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent: default_max_concurrent(),
            default_ttl_ms: default_ttl_ms(),
        }
    }
}

impl BatchConfig {
    /// Tick interval as a [`std::time::Duration`].
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    /// Default TTL as a [`std::time::Duration`], `None` when disabled.
    pub fn default_ttl(&self) -> Option<std::time::Duration> {
        (self.default_ttl_ms > 0).then(|| std::time::Duration::from_millis(self.default_ttl_ms))
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
