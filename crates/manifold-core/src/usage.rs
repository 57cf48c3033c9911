//! Thread-safe usage telemetry.
//!
//! [`UsageTracker`] is the one shared singleton in the routing core: the
//! selector reads it for budget and error-rate guards, the cost optimizer
//! and predictor sample it, and the orchestrator writes to it after every
//! provider call. A single `RwLock` protects its counters; snapshots are
//! deep copies, never views into internal state.
//!
//! Counters accumulate from construction (or the last explicit
//! [`UsageTracker::reset`]); the embedding application owns the reset
//! cadence for daily budgets.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use manifold_types::PricingTable;

// ── ModelUsage ─────────────────────────────────────────────────────────

/// Accumulated counters for one `(provider, model)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelUsage {
    /// Provider name.
    pub provider: String,
    /// Model id.
    pub model: String,
    /// Total requests, successful and failed.
    pub total_requests: u64,
    /// Total input tokens.
    pub input_tokens: u64,
    /// Total output tokens.
    pub output_tokens: u64,
    /// Total cost in USD at the pricing table's rates.
    pub total_cost: f64,
    /// Sum of request latencies in milliseconds.
    pub total_latency_ms: u64,
    /// `total_latency_ms / total_requests`.
    pub avg_latency_ms: f64,
    /// Requests that failed.
    pub error_count: u64,
    /// When this pair was last touched.
    pub last_used: DateTime<Utc>,
}

impl ModelUsage {
    fn new(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            total_requests: 0,
            input_tokens: 0,
            output_tokens: 0,
            total_cost: 0.0,
            total_latency_ms: 0,
            avg_latency_ms: 0.0,
            error_count: 0,
            last_used: Utc::now(),
        }
    }

    /// `error_count / total_requests`, zero before any request.
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.error_count as f64 / self.total_requests as f64
        }
    }

    fn merge_into(&self, agg: &mut ModelUsage) {
        agg.total_requests += self.total_requests;
        agg.input_tokens += self.input_tokens;
        agg.output_tokens += self.output_tokens;
        agg.total_cost += self.total_cost;
        agg.total_latency_ms += self.total_latency_ms;
        agg.error_count += self.error_count;
        if self.last_used > agg.last_used {
            agg.last_used = self.last_used;
        }
        agg.avg_latency_ms = if agg.total_requests == 0 {
            0.0
        } else {
            agg.total_latency_ms as f64 / agg.total_requests as f64
        };
    }
}

// ── UsageSnapshot ──────────────────────────────────────────────────────

/// A deep-copied view of the tracker at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Per-`(provider, model)` rows, keyed `provider/model`.
    pub models: HashMap<String, ModelUsage>,
    /// Total requests across all rows.
    pub total_requests: u64,
    /// Total input + output tokens across all rows.
    pub total_tokens: u64,
    /// Total cost across all rows in USD.
    pub total_cost: f64,
    /// When the tracker started accumulating (construction or last reset).
    pub since: DateTime<Utc>,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

// ── UsageTracker ───────────────────────────────────────────────────────

struct TrackerState {
    models: HashMap<String, ModelUsage>,
    since: DateTime<Utc>,
}

/// Thread-safe accumulator of per-provider and per-model counters.
pub struct UsageTracker {
    state: RwLock<TrackerState>,
    pricing: PricingTable,
}

fn key(provider: &str, model: &str) -> String {
    format!("{provider}/{model}")
}

impl UsageTracker {
    /// Create a tracker priced by the given table.
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            state: RwLock::new(TrackerState {
                models: HashMap::new(),
                since: Utc::now(),
            }),
            pricing,
        }
    }

    /// Record a successful request.
    pub fn record_usage(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        latency_ms: u64,
    ) {
        let cost = self.pricing.cost(model, input_tokens, output_tokens);
        let mut state = self.state.write().expect("usage tracker lock poisoned");
        let entry = state
            .models
            .entry(key(provider, model))
            .or_insert_with(|| ModelUsage::new(provider, model));
        entry.total_requests += 1;
        entry.input_tokens += input_tokens;
        entry.output_tokens += output_tokens;
        entry.total_cost += cost;
        entry.total_latency_ms += latency_ms;
        entry.avg_latency_ms = entry.total_latency_ms as f64 / entry.total_requests as f64;
        entry.last_used = Utc::now();
    }

    /// Record a failed request. Also bumps `total_requests` so the error
    /// rate stays well-defined.
    pub fn record_error(&self, provider: &str, model: &str) {
        let mut state = self.state.write().expect("usage tracker lock poisoned");
        let entry = state
            .models
            .entry(key(provider, model))
            .or_insert_with(|| ModelUsage::new(provider, model));
        entry.total_requests += 1;
        entry.error_count += 1;
        entry.avg_latency_ms = entry.total_latency_ms as f64 / entry.total_requests as f64;
        entry.last_used = Utc::now();
    }

    /// Deep-copied snapshot of every row plus totals.
    pub fn snapshot(&self) -> UsageSnapshot {
        let state = self.state.read().expect("usage tracker lock poisoned");
        let total_requests = state.models.values().map(|m| m.total_requests).sum();
        let total_tokens = state
            .models
            .values()
            .map(|m| m.input_tokens + m.output_tokens)
            .sum();
        let total_cost = state.models.values().map(|m| m.total_cost).sum();
        UsageSnapshot {
            models: state.models.clone(),
            total_requests,
            total_tokens,
            total_cost,
            since: state.since,
            taken_at: Utc::now(),
        }
    }

    /// Counters for one `(provider, model)` pair.
    pub fn model_usage(&self, provider: &str, model: &str) -> Option<ModelUsage> {
        let state = self.state.read().expect("usage tracker lock poisoned");
        state.models.get(&key(provider, model)).cloned()
    }

    /// Counters for a model id merged across providers. The selector uses
    /// this for error-rate escalation -- it knows the model it picked, not
    /// which provider will serve it.
    pub fn usage_for_model(&self, model: &str) -> Option<ModelUsage> {
        let state = self.state.read().expect("usage tracker lock poisoned");
        let mut agg: Option<ModelUsage> = None;
        for usage in state.models.values().filter(|m| m.model == model) {
            let target = agg.get_or_insert_with(|| ModelUsage::new("*", model));
            usage.merge_into(target);
        }
        agg
    }

    /// Aggregate counters for one provider across its models.
    pub fn provider_usage(&self, provider: &str) -> Option<ModelUsage> {
        let state = self.state.read().expect("usage tracker lock poisoned");
        let mut agg: Option<ModelUsage> = None;
        for usage in state.models.values().filter(|m| m.provider == provider) {
            let target = agg.get_or_insert_with(|| ModelUsage::new(provider, "*"));
            usage.merge_into(target);
        }
        agg
    }

    /// Cumulative cost in USD since construction or the last reset.
    pub fn total_cost(&self) -> f64 {
        let state = self.state.read().expect("usage tracker lock poisoned");
        state.models.values().map(|m| m.total_cost).sum()
    }

    /// Drop every counter and restart the accumulation window.
    pub fn reset(&self) {
        let mut state = self.state.write().expect("usage tracker lock poisoned");
        state.models.clear();
        state.since = Utc::now();
    }

    /// The pricing table this tracker costs requests against.
    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new(PricingTable::builtin())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_usage_accumulates() {
        let tracker = UsageTracker::default();
        tracker.record_usage("anthropic", "claude-sonnet-4-6", 1000, 500, 800);
        tracker.record_usage("anthropic", "claude-sonnet-4-6", 2000, 1000, 1200);

        let usage = tracker.model_usage("anthropic", "claude-sonnet-4-6").unwrap();
        assert_eq!(usage.total_requests, 2);
        assert_eq!(usage.input_tokens, 3000);
        assert_eq!(usage.output_tokens, 1500);
        assert_eq!(usage.total_latency_ms, 2000);
        assert!((usage.avg_latency_ms - 1000.0).abs() < f64::EPSILON);
        assert_eq!(usage.error_count, 0);
    }

    #[test]
    fn cost_uses_pricing_table() {
        let tracker = UsageTracker::default();
        // sonnet: 3.0 in / 15.0 out per MTok.
        tracker.record_usage("anthropic", "claude-sonnet-4-6", 1_000_000, 1_000_000, 100);
        assert!((tracker.total_cost() - 18.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_costs_zero() {
        let tracker = UsageTracker::default();
        tracker.record_usage("local", "llama-3.1-8b", 1_000_000, 1_000_000, 100);
        assert_eq!(tracker.total_cost(), 0.0);
    }

    #[test]
    fn errors_count_toward_totals() {
        let tracker = UsageTracker::default();
        tracker.record_usage("anthropic", "claude-haiku-4-5-20251001", 100, 50, 200);
        tracker.record_error("anthropic", "claude-haiku-4-5-20251001");
        tracker.record_error("anthropic", "claude-haiku-4-5-20251001");

        let usage = tracker
            .model_usage("anthropic", "claude-haiku-4-5-20251001")
            .unwrap();
        assert_eq!(usage.total_requests, 3);
        assert_eq!(usage.error_count, 2);
        assert!((usage.error_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn error_only_row_has_defined_rate() {
        let tracker = UsageTracker::default();
        tracker.record_error("anthropic", "claude-opus-4-6");
        let usage = tracker.model_usage("anthropic", "claude-opus-4-6").unwrap();
        assert_eq!(usage.total_requests, 1);
        assert!((usage.error_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_is_deep_copy() {
        let tracker = UsageTracker::default();
        tracker.record_usage("anthropic", "claude-sonnet-4-6", 100, 50, 300);
        let snap = tracker.snapshot();
        tracker.record_usage("anthropic", "claude-sonnet-4-6", 100, 50, 300);

        assert_eq!(snap.total_requests, 1);
        assert_eq!(tracker.snapshot().total_requests, 2);
    }

    #[test]
    fn usage_for_model_merges_providers() {
        let tracker = UsageTracker::default();
        tracker.record_usage("primary", "claude-sonnet-4-6", 100, 50, 100);
        tracker.record_usage("secondary", "claude-sonnet-4-6", 300, 150, 300);

        let merged = tracker.usage_for_model("claude-sonnet-4-6").unwrap();
        assert_eq!(merged.total_requests, 2);
        assert_eq!(merged.input_tokens, 400);
        assert!((merged.avg_latency_ms - 200.0).abs() < f64::EPSILON);
        assert!(tracker.usage_for_model("absent").is_none());
    }

    #[test]
    fn provider_usage_merges_models() {
        let tracker = UsageTracker::default();
        tracker.record_usage("anthropic", "claude-haiku-4-5-20251001", 100, 50, 100);
        tracker.record_usage("anthropic", "claude-opus-4-6", 100, 50, 100);
        tracker.record_error("anthropic", "claude-opus-4-6");

        let agg = tracker.provider_usage("anthropic").unwrap();
        assert_eq!(agg.total_requests, 3);
        assert_eq!(agg.error_count, 1);
    }

    #[test]
    fn reset_clears_counters() {
        let tracker = UsageTracker::default();
        tracker.record_usage("anthropic", "claude-sonnet-4-6", 1000, 500, 100);
        assert!(tracker.total_cost() > 0.0);

        tracker.reset();
        assert_eq!(tracker.total_cost(), 0.0);
        assert!(tracker.snapshot().models.is_empty());
    }

    #[test]
    fn counters_monotonic_between_resets() {
        let tracker = UsageTracker::default();
        let mut last = 0u64;
        for _ in 0..10 {
            tracker.record_usage("anthropic", "claude-haiku-4-5-20251001", 10, 5, 1);
            let now = tracker.snapshot().total_requests;
            assert!(now > last);
            last = now;
        }
    }

    #[test]
    fn concurrent_writes_all_land() {
        use std::sync::Arc;
        let tracker = Arc::new(UsageTracker::default());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let t = tracker.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    t.record_usage("anthropic", "claude-haiku-4-5-20251001", 10, 5, 1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.snapshot().total_requests, 800);
    }
}
