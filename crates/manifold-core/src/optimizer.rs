//! Cost optimization over a rolling window of request records.
//!
//! [`CostOptimizer`] keeps an append-only window of [`CostRecord`]s and
//! turns it into three things: period breakdowns (by model, tier, and
//! complexity), downgrade advice under a configurable
//! [`OptimizationPolicy`], and threshold-gated saving suggestions. A clean
//! workload produces no suggestions -- every analysis has a floor it must
//! cross before it speaks up.
//!
//! Query-side APIs never fail: degraded or empty data yields empty results
//! so the optimizer is safe to wire in optionally.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use manifold_types::{ComplexityLevel, ModelAliases, ModelTier, PricingTable};

// ── Policy ─────────────────────────────────────────────────────────────

/// How aggressively the optimizer trades quality for cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizationPolicy {
    /// Downgrade whenever complexity under-uses the tier, and early on
    /// budget pressure.
    Strict,
    /// Downgrade clear waste (simple work on expensive tiers) and hard
    /// budget pressure.
    #[default]
    BestEffort,
    /// Only downgrade once the budget is actually spent.
    QualityFirst,
}

// ── CostRecord ─────────────────────────────────────────────────────────

/// One completed request in the rolling window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    /// When the request completed.
    pub timestamp: DateTime<Utc>,
    /// The model that served it.
    pub model: String,
    /// The tier the model served.
    pub tier: ModelTier,
    /// The complexity level the request scored.
    pub complexity: ComplexityLevel,
    /// Input tokens consumed.
    pub input_tokens: u64,
    /// Output tokens produced.
    pub output_tokens: u64,
    /// Cost in USD at the pricing table's rates.
    pub cost: f64,
}

// ── Breakdown ──────────────────────────────────────────────────────────

/// Aggregates for one grouping key within a breakdown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakdownRow {
    /// Requests in the group.
    pub requests: u64,
    /// Total cost in USD.
    pub total_cost: f64,
    /// Total input tokens.
    pub input_tokens: u64,
    /// Total output tokens.
    pub output_tokens: u64,
    /// `total_cost / requests`.
    pub avg_cost: f64,
}

impl BreakdownRow {
    fn add(&mut self, record: &CostRecord) {
        self.requests += 1;
        self.total_cost += record.cost;
        self.input_tokens += record.input_tokens;
        self.output_tokens += record.output_tokens;
        self.avg_cost = self.total_cost / self.requests as f64;
    }
}

/// Cost totals over a period, grouped three ways.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Requests in the period.
    pub total_requests: u64,
    /// Total cost in USD.
    pub total_cost: f64,
    /// Total input tokens.
    pub total_input_tokens: u64,
    /// Total output tokens.
    pub total_output_tokens: u64,
    /// Rows keyed by model id.
    pub by_model: HashMap<String, BreakdownRow>,
    /// Rows keyed by tier.
    pub by_tier: HashMap<ModelTier, BreakdownRow>,
    /// Rows keyed by complexity level.
    pub by_complexity: HashMap<ComplexityLevel, BreakdownRow>,
}

// ── Suggestions ────────────────────────────────────────────────────────

/// One saving opportunity the analyses surfaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationSuggestion {
    /// What to change, human-readable.
    pub description: String,
    /// Estimated saving in USD over the current window.
    pub estimated_savings: f64,
    /// How sure the analysis is, `0.0..=1.0`.
    pub confidence: f64,
}

/// Current vs optimal spend plus the suggestion list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingsEstimate {
    /// Spend over the current window in USD.
    pub current_spend: f64,
    /// What the window would have cost with every record re-priced at the
    /// canonical model for its complexity level.
    pub optimal_spend: f64,
    /// `current_spend - optimal_spend`, floored at zero.
    pub potential_savings: f64,
    /// The threshold-gated suggestions, highest saving first.
    pub suggestions: Vec<OptimizationSuggestion>,
}

/// Share of requests that must be wasteful before the tier-waste analyses
/// produce a suggestion.
const WASTE_SHARE_THRESHOLD: f64 = 0.10;

/// Second-half/first-half cost ratio that counts as a spike.
const SPIKE_RATIO: f64 = 1.5;

/// Cost share at which one model counts as concentrated.
const CONCENTRATION_COST_SHARE: f64 = 0.70;

/// Request share required alongside the cost share.
const CONCENTRATION_REQUEST_SHARE: f64 = 0.50;

// ── CostOptimizer ──────────────────────────────────────────────────────

struct OptimizerState {
    records: Vec<CostRecord>,
}

/// Rolling-window cost analyzer and downgrade advisor.
pub struct CostOptimizer {
    state: RwLock<OptimizerState>,
    policy: OptimizationPolicy,
    pricing: PricingTable,
    aliases: ModelAliases,
    daily_budget_usd: f64,
    max_records: usize,
}

/// Default rolling-window capacity.
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

impl CostOptimizer {
    /// Create an optimizer with the default policy and window capacity.
    pub fn new(pricing: PricingTable, aliases: ModelAliases) -> Self {
        Self {
            state: RwLock::new(OptimizerState {
                records: Vec::new(),
            }),
            policy: OptimizationPolicy::default(),
            pricing,
            aliases,
            daily_budget_usd: 0.0,
            max_records: DEFAULT_MAX_RECORDS,
        }
    }

    /// Set the optimization policy.
    pub fn with_policy(mut self, policy: OptimizationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the daily budget in USD driving the utilization rules.
    /// Zero disables them.
    pub fn with_daily_budget(mut self, budget_usd: f64) -> Self {
        self.daily_budget_usd = budget_usd;
        self
    }

    /// Cap the rolling window (records beyond it evict from the front).
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records.max(1);
        self
    }

    /// Append a record; the cost is computed from the pricing table so the
    /// `cost = tokens x rate` invariant holds by construction.
    pub fn record(
        &self,
        model: &str,
        tier: ModelTier,
        complexity: ComplexityLevel,
        input_tokens: u64,
        output_tokens: u64,
    ) {
        let record = CostRecord {
            timestamp: Utc::now(),
            model: model.into(),
            tier,
            complexity,
            input_tokens,
            output_tokens,
            cost: self.pricing.cost(model, input_tokens, output_tokens),
        };
        let mut state = self.state.write().expect("cost optimizer lock poisoned");
        if state.records.len() >= self.max_records {
            state.records.remove(0);
        }
        state.records.push(record);
    }

    /// Append a record derived from a completed selection, keeping call
    /// sites in the orchestrator and embedders small.
    pub fn record_selection(
        &self,
        selection: &crate::selector::SelectionResult,
        complexity: ComplexityLevel,
        input_tokens: u64,
        output_tokens: u64,
    ) {
        self.record(
            &selection.model,
            selection.tier,
            complexity,
            input_tokens,
            output_tokens,
        );
    }

    /// Number of records currently in the window.
    pub fn record_count(&self) -> usize {
        self.state
            .read()
            .expect("cost optimizer lock poisoned")
            .records
            .len()
    }

    /// Total cost of the current window in USD.
    pub fn window_cost(&self) -> f64 {
        self.state
            .read()
            .expect("cost optimizer lock poisoned")
            .records
            .iter()
            .map(|r| r.cost)
            .sum()
    }

    /// Spend as a fraction of the daily budget, zero when no budget is set.
    pub fn budget_utilization(&self) -> f64 {
        if self.daily_budget_usd <= 0.0 {
            return 0.0;
        }
        self.window_cost() / self.daily_budget_usd
    }

    /// Downgrade advice for a request about to run on `tier` at
    /// `complexity`, per the configured policy. `None` means keep the tier.
    pub fn should_downgrade(
        &self,
        tier: ModelTier,
        complexity: ComplexityLevel,
    ) -> Option<ModelTier> {
        let utilization = self.budget_utilization();
        let advice = match self.policy {
            OptimizationPolicy::Strict => Self::strict_advice(tier, complexity, utilization),
            OptimizationPolicy::BestEffort => {
                Self::best_effort_advice(tier, complexity, utilization)
            }
            OptimizationPolicy::QualityFirst => {
                (utilization >= 1.0 && tier > ModelTier::Haiku).then_some(ModelTier::Haiku)
            }
        };
        if let Some(to) = advice {
            debug!(%tier, %complexity, utilization, %to, "downgrade advised");
        }
        advice
    }

    fn strict_advice(
        tier: ModelTier,
        complexity: ComplexityLevel,
        utilization: f64,
    ) -> Option<ModelTier> {
        if complexity == ComplexityLevel::Simple && tier > ModelTier::Haiku {
            return Some(ModelTier::Haiku);
        }
        if complexity == ComplexityLevel::Standard && tier == ModelTier::Opus {
            return Some(ModelTier::Sonnet);
        }
        if utilization >= 1.0 && tier > ModelTier::Haiku {
            return Some(ModelTier::Haiku);
        }
        if utilization >= 0.9 && tier == ModelTier::Sonnet {
            return Some(ModelTier::Haiku);
        }
        if utilization >= 0.7 && tier == ModelTier::Opus {
            return Some(ModelTier::Sonnet);
        }
        None
    }

    fn best_effort_advice(
        tier: ModelTier,
        complexity: ComplexityLevel,
        utilization: f64,
    ) -> Option<ModelTier> {
        if complexity == ComplexityLevel::Simple && tier > ModelTier::Haiku {
            return Some(ModelTier::Haiku);
        }
        if utilization >= 1.0 && tier > ModelTier::Haiku {
            return Some(ModelTier::Haiku);
        }
        if utilization >= 0.8 && tier == ModelTier::Opus {
            return Some(ModelTier::Sonnet);
        }
        None
    }

    /// Cost totals over the trailing `period`, grouped by model, tier, and
    /// complexity.
    ///
    /// A zero-duration period is an exclusive window and returns an empty
    /// breakdown.
    pub fn breakdown(&self, period: Duration) -> CostBreakdown {
        // A period too large to represent covers the whole window.
        let cutoff = chrono::Duration::from_std(period)
            .ok()
            .and_then(|p| Utc::now().checked_sub_signed(p));
        let state = self.state.read().expect("cost optimizer lock poisoned");

        let mut breakdown = CostBreakdown::default();
        for record in state
            .records
            .iter()
            .filter(|r| cutoff.is_none_or(|c| r.timestamp > c))
        {
            breakdown.total_requests += 1;
            breakdown.total_cost += record.cost;
            breakdown.total_input_tokens += record.input_tokens;
            breakdown.total_output_tokens += record.output_tokens;
            breakdown
                .by_model
                .entry(record.model.clone())
                .or_default()
                .add(record);
            breakdown.by_tier.entry(record.tier).or_default().add(record);
            breakdown
                .by_complexity
                .entry(record.complexity)
                .or_default()
                .add(record);
        }
        breakdown
    }

    /// The threshold-gated suggestion list, highest estimated saving first.
    pub fn suggestions(&self) -> Vec<OptimizationSuggestion> {
        let state = self.state.read().expect("cost optimizer lock poisoned");
        let records = &state.records;
        if records.is_empty() {
            return Vec::new();
        }

        let mut out = Vec::new();
        if let Some(s) = self.simple_on_expensive(records) {
            out.push(s);
        }
        if let Some(s) = self.standard_on_opus(records) {
            out.push(s);
        }
        if let Some(s) = Self::cost_spike(records) {
            out.push(s);
        }
        if let Some(s) = self.model_concentration(records) {
            out.push(s);
        }
        out.sort_by(|a, b| {
            b.estimated_savings
                .partial_cmp(&a.estimated_savings)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        out
    }

    /// Current vs optimal spend: every record re-priced at the canonical
    /// model for its complexity level.
    pub fn savings_estimate(&self) -> SavingsEstimate {
        let (current, optimal) = {
            let state = self.state.read().expect("cost optimizer lock poisoned");
            let current: f64 = state.records.iter().map(|r| r.cost).sum();
            let optimal: f64 = state
                .records
                .iter()
                .map(|r| {
                    let canonical = self.aliases.resolve(ModelTier::for_level(r.complexity));
                    self.pricing.cost(canonical, r.input_tokens, r.output_tokens)
                })
                .sum();
            (current, optimal)
        };
        SavingsEstimate {
            current_spend: current,
            optimal_spend: optimal,
            potential_savings: (current - optimal).max(0.0),
            suggestions: self.suggestions(),
        }
    }

    /// Drop records older than `age`, in place. An age beyond representable
    /// time keeps everything.
    pub fn prune_older_than(&self, age: Duration) {
        let Ok(age) = chrono::Duration::from_std(age) else {
            return;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return;
        };
        let mut state = self.state.write().expect("cost optimizer lock poisoned");
        state.records.retain(|r| r.timestamp >= cutoff);
    }

    // ── Analyses ───────────────────────────────────────────────────

    fn simple_on_expensive(&self, records: &[CostRecord]) -> Option<OptimizationSuggestion> {
        let wasteful: Vec<&CostRecord> = records
            .iter()
            .filter(|r| r.complexity == ComplexityLevel::Simple && r.tier > ModelTier::Haiku)
            .collect();
        let share = wasteful.len() as f64 / records.len() as f64;
        if share < WASTE_SHARE_THRESHOLD {
            return None;
        }

        let haiku = self.aliases.resolve(ModelTier::Haiku);
        let savings: f64 = wasteful
            .iter()
            .map(|r| r.cost - self.pricing.cost(haiku, r.input_tokens, r.output_tokens))
            .sum();
        Some(OptimizationSuggestion {
            description: format!(
                "{:.0}% of requests are simple but ran on sonnet/opus; route them to haiku",
                share * 100.0
            ),
            estimated_savings: savings,
            confidence: 0.9,
        })
    }

    fn standard_on_opus(&self, records: &[CostRecord]) -> Option<OptimizationSuggestion> {
        let wasteful: Vec<&CostRecord> = records
            .iter()
            .filter(|r| r.complexity == ComplexityLevel::Standard && r.tier == ModelTier::Opus)
            .collect();
        let share = wasteful.len() as f64 / records.len() as f64;
        if share < WASTE_SHARE_THRESHOLD {
            return None;
        }

        let sonnet = self.aliases.resolve(ModelTier::Sonnet);
        let savings: f64 = wasteful
            .iter()
            .map(|r| r.cost - self.pricing.cost(sonnet, r.input_tokens, r.output_tokens))
            .sum();
        Some(OptimizationSuggestion {
            description: format!(
                "{:.0}% of requests are standard but ran on opus; route them to sonnet",
                share * 100.0
            ),
            estimated_savings: savings,
            confidence: 0.8,
        })
    }

    fn cost_spike(records: &[CostRecord]) -> Option<OptimizationSuggestion> {
        if records.len() < 2 {
            return None;
        }
        let mid = records.len() / 2;
        let first: f64 = records[..mid].iter().map(|r| r.cost).sum();
        let second: f64 = records[mid..].iter().map(|r| r.cost).sum();
        if first <= 0.0 || second <= SPIKE_RATIO * first {
            return None;
        }
        Some(OptimizationSuggestion {
            description: format!(
                "spend spiked {:.1}x in the second half of the window (${first:.2} to ${second:.2})",
                second / first
            ),
            estimated_savings: second - first,
            confidence: 0.6,
        })
    }

    fn model_concentration(&self, records: &[CostRecord]) -> Option<OptimizationSuggestion> {
        let total_cost: f64 = records.iter().map(|r| r.cost).sum();
        if total_cost <= 0.0 {
            return None;
        }

        let mut per_model: HashMap<&str, (u64, f64)> = HashMap::new();
        for r in records {
            let entry = per_model.entry(r.model.as_str()).or_default();
            entry.0 += 1;
            entry.1 += r.cost;
        }

        for (model, (requests, cost)) in per_model {
            let cost_share = cost / total_cost;
            let request_share = requests as f64 / records.len() as f64;
            if cost_share >= CONCENTRATION_COST_SHARE
                && request_share >= CONCENTRATION_REQUEST_SHARE
                && self.pricing.is_expensive(model)
            {
                return Some(OptimizationSuggestion {
                    description: format!(
                        "{model} carries {:.0}% of spend and {:.0}% of requests; \
                         spread load to cheaper tiers",
                        cost_share * 100.0,
                        request_share * 100.0
                    ),
                    estimated_savings: 0.3 * cost,
                    confidence: 0.55,
                });
            }
        }
        None
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
