//! Complexity-to-model selection.
//!
//! [`ModelSelector`] maps a [`ComplexityScore`] plus live signals from the
//! shared [`UsageTracker`] to a concrete model id. Selection walks four
//! rules in priority order:
//!
//! 1. A caller-requested model always wins (marked `overridden`).
//! 2. The complexity band picks the default tier.
//! 3. The budget guard forces cheap tiers as daily spend approaches the
//!    configured budget.
//! 4. A model with an error rate above 30% is escalated one tier up.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use manifold_types::{ComplexityLevel, ModelAliases, ModelTier, PricingTable};

use crate::complexity::ComplexityScore;
use crate::usage::UsageTracker;

// ── TierTable ──────────────────────────────────────────────────────────

/// One row of the tier hierarchy: a tier, the model serving it, and the
/// highest complexity score the tier covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierEntry {
    /// The capability band.
    pub tier: ModelTier,
    /// Concrete model id serving the band.
    pub model: String,
    /// Inclusive upper complexity bound for the band.
    pub max_complexity: u32,
}

/// The ordered tier hierarchy, cheapest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierTable {
    entries: Vec<TierEntry>,
}

impl TierTable {
    /// The default three-band table resolved through an alias map:
    /// haiku to 14, sonnet to 39, opus to 100.
    pub fn from_aliases(aliases: &ModelAliases) -> Self {
        Self {
            entries: vec![
                TierEntry {
                    tier: ModelTier::Haiku,
                    model: aliases.resolve(ModelTier::Haiku).into(),
                    max_complexity: 14,
                },
                TierEntry {
                    tier: ModelTier::Sonnet,
                    model: aliases.resolve(ModelTier::Sonnet).into(),
                    max_complexity: 39,
                },
                TierEntry {
                    tier: ModelTier::Opus,
                    model: aliases.resolve(ModelTier::Opus).into(),
                    max_complexity: 100,
                },
            ],
        }
    }

    /// The tier whose band contains the score.
    pub fn tier_for_score(&self, score: u32) -> ModelTier {
        self.entries
            .iter()
            .find(|e| score <= e.max_complexity)
            .map(|e| e.tier)
            // Scores are clamped to 100, but stay total anyway.
            .unwrap_or(ModelTier::Opus)
    }

    /// The model id serving a tier.
    pub fn model_for_tier(&self, tier: ModelTier) -> &str {
        self.entries
            .iter()
            .find(|e| e.tier == tier)
            .map(|e| e.model.as_str())
            .unwrap_or_default()
    }

    /// The tier of a model id already present in the table
    /// (case-insensitive).
    pub fn tier_of_model(&self, model: &str) -> Option<ModelTier> {
        self.entries
            .iter()
            .find(|e| e.model.eq_ignore_ascii_case(model))
            .map(|e| e.tier)
    }

    /// The rows of the table, cheapest first.
    pub fn entries(&self) -> &[TierEntry] {
        &self.entries
    }
}

// ── SelectionResult ────────────────────────────────────────────────────

/// The outcome of one selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionResult {
    /// The model to invoke.
    pub model: String,
    /// The tier the model serves.
    pub tier: ModelTier,
    /// The rule that drove the decision, human-readable.
    pub reason: String,
    /// Blended cost per 1K tokens at the pricing table's rates.
    pub blended_cost_per_1k: f64,
    /// Whether a caller-requested model bypassed selection.
    pub overridden: bool,
}

// ── ModelSelector ──────────────────────────────────────────────────────

/// Error rate above which a model is escalated one tier.
const ERROR_RATE_ESCALATION: f64 = 0.3;

/// Budget fraction at which opus is downgraded to sonnet.
const BUDGET_SOFT_LIMIT: f64 = 0.8;

/// Maps complexity plus live telemetry to a concrete model.
pub struct ModelSelector {
    table: TierTable,
    pricing: PricingTable,
    tracker: Option<Arc<UsageTracker>>,
    daily_budget_usd: f64,
}

impl ModelSelector {
    /// Create a selector over the default tier table for an alias map.
    pub fn new(aliases: &ModelAliases, pricing: PricingTable) -> Self {
        Self {
            table: TierTable::from_aliases(aliases),
            pricing,
            tracker: None,
            daily_budget_usd: 0.0,
        }
    }

    /// Attach the shared usage tracker, enabling the budget guard and
    /// error-rate escalation.
    pub fn with_tracker(mut self, tracker: Arc<UsageTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Set the daily budget in USD. Zero disables the budget guard.
    pub fn with_daily_budget(mut self, budget_usd: f64) -> Self {
        self.daily_budget_usd = budget_usd;
        self
    }

    /// The tier table backing this selector.
    pub fn table(&self) -> &TierTable {
        &self.table
    }

    /// Pick a model for a scored request.
    ///
    /// `requested_model` short-circuits everything: the caller's explicit
    /// choice is honored with `overridden = true` and the tier inferred
    /// from the table or the model name.
    pub fn select(
        &self,
        complexity: &ComplexityScore,
        requested_model: Option<&str>,
    ) -> SelectionResult {
        if let Some(requested) = requested_model.filter(|m| !m.is_empty()) {
            let tier = self
                .table
                .tier_of_model(requested)
                .unwrap_or_else(|| ModelTier::from_model_name(requested));
            debug!(model = requested, %tier, "caller override");
            return SelectionResult {
                model: requested.into(),
                tier,
                reason: "requested model override".into(),
                blended_cost_per_1k: self.blended_cost(requested),
                overridden: true,
            };
        }

        // The level is authoritative: context influence may have rewritten
        // it away from the raw score's band.
        let mut tier = ModelTier::for_level(complexity.level);
        let mut reason = format!(
            "{} request (score {})",
            complexity.level, complexity.score
        );

        // Budget guard.
        if self.daily_budget_usd > 0.0
            && let Some(tracker) = &self.tracker
        {
            let spent = tracker.total_cost();
            if spent >= self.daily_budget_usd {
                tier = ModelTier::Haiku;
                reason = format!(
                    "daily budget exhausted (${spent:.2} of ${:.2})",
                    self.daily_budget_usd
                );
            } else if spent >= BUDGET_SOFT_LIMIT * self.daily_budget_usd
                && tier == ModelTier::Opus
            {
                tier = ModelTier::Sonnet;
                reason = format!(
                    "daily budget nearly exhausted (${spent:.2} of ${:.2}), downgraded opus",
                    self.daily_budget_usd
                );
            }
        }

        // Error-rate escalation.
        if let Some(tracker) = &self.tracker {
            let model = self.table.model_for_tier(tier);
            if let Some(usage) = tracker.usage_for_model(model)
                && usage.error_rate() > ERROR_RATE_ESCALATION
                && tier < ModelTier::Opus
            {
                let escalated = tier.escalate();
                reason = format!(
                    "{model} error rate {:.0}% above {:.0}%, escalated {tier} to {escalated}",
                    usage.error_rate() * 100.0,
                    ERROR_RATE_ESCALATION * 100.0
                );
                tier = escalated;
            }
        }

        let model = self.table.model_for_tier(tier).to_string();
        debug!(%tier, %model, %reason, "model selected");
        SelectionResult {
            blended_cost_per_1k: self.blended_cost(&model),
            model,
            tier,
            reason,
            overridden: false,
        }
    }

    fn blended_cost(&self, model: &str) -> f64 {
        self.pricing
            .for_model(model)
            .map(|p| p.blended_per_1k())
            .unwrap_or(0.0)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complexity::ComplexityAnalyzer;
    use manifold_types::aliases::{DEFAULT_HAIKU, DEFAULT_OPUS, DEFAULT_SONNET};

    fn selector() -> ModelSelector {
        ModelSelector::new(&ModelAliases::default(), PricingTable::builtin())
    }

    fn score(value: u32) -> ComplexityScore {
        ComplexityScore {
            score: value,
            level: ComplexityLevel::from_score(value),
            reasons: Vec::new(),
        }
    }

    #[test]
    fn bands_pick_default_tiers() {
        let s = selector();
        assert_eq!(s.select(&score(5), None).tier, ModelTier::Haiku);
        assert_eq!(s.select(&score(20), None).tier, ModelTier::Sonnet);
        assert_eq!(s.select(&score(60), None).tier, ModelTier::Opus);
    }

    #[test]
    fn models_resolve_through_aliases() {
        let s = selector();
        assert_eq!(s.select(&score(5), None).model, DEFAULT_HAIKU);
        assert_eq!(s.select(&score(20), None).model, DEFAULT_SONNET);
        assert_eq!(s.select(&score(60), None).model, DEFAULT_OPUS);
    }

    #[test]
    fn reason_names_the_level() {
        let s = selector();
        let result = s.select(&score(5), None);
        assert!(result.reason.contains("simple"));
        let result = s.select(&score(60), None);
        assert!(result.reason.contains("complex"));
    }

    #[test]
    fn requested_model_overrides() {
        let s = selector();
        let result = s.select(&score(60), Some("my-custom-model"));
        assert!(result.overridden);
        assert_eq!(result.model, "my-custom-model");
        assert_eq!(result.tier, ModelTier::Sonnet); // no keyword -> sonnet-class
        assert!(result.reason.contains("override"));
    }

    #[test]
    fn requested_model_tier_from_table_match() {
        let s = selector();
        let result = s.select(&score(5), Some("CLAUDE-OPUS-4-6"));
        assert_eq!(result.tier, ModelTier::Opus);
        assert!(result.overridden);
    }

    #[test]
    fn requested_model_tier_from_keyword() {
        let s = selector();
        let result = s.select(&score(60), Some("vendor-haiku-lite"));
        assert_eq!(result.tier, ModelTier::Haiku);
    }

    #[test]
    fn empty_requested_model_ignored() {
        let s = selector();
        let result = s.select(&score(60), Some(""));
        assert!(!result.overridden);
        assert_eq!(result.tier, ModelTier::Opus);
    }

    #[test]
    fn budget_exhausted_forces_haiku() {
        let tracker = Arc::new(UsageTracker::default());
        // 10M in + 10M out on opus: 10*5 + 10*25 = $300.
        tracker.record_usage("x", DEFAULT_OPUS, 10_000_000, 10_000_000, 500);

        let s = selector().with_tracker(tracker).with_daily_budget(10.0);
        let result = s.select(&score(60), None);
        assert_eq!(result.tier, ModelTier::Haiku);
        assert!(result.reason.contains("budget"));
    }

    #[test]
    fn budget_soft_limit_downgrades_opus_only() {
        let tracker = Arc::new(UsageTracker::default());
        // $18 of a $20 budget: 90% > 80% soft limit.
        tracker.record_usage("x", DEFAULT_SONNET, 1_000_000, 1_000_000, 100);

        let s = selector().with_tracker(tracker).with_daily_budget(20.0);
        let result = s.select(&score(60), None);
        assert_eq!(result.tier, ModelTier::Sonnet);
        assert!(result.reason.contains("budget"));

        // A standard request already on sonnet is untouched.
        let result = s.select(&score(20), None);
        assert_eq!(result.tier, ModelTier::Sonnet);
        assert!(!result.reason.contains("budget"));
    }

    #[test]
    fn zero_budget_disables_guard() {
        let tracker = Arc::new(UsageTracker::default());
        tracker.record_usage("x", DEFAULT_OPUS, 10_000_000, 10_000_000, 500);

        let s = selector().with_tracker(tracker);
        assert_eq!(s.select(&score(60), None).tier, ModelTier::Opus);
    }

    #[test]
    fn error_rate_escalates_one_tier() {
        let tracker = Arc::new(UsageTracker::default());
        tracker.record_usage("x", DEFAULT_HAIKU, 100, 50, 100);
        tracker.record_error("x", DEFAULT_HAIKU);
        // 1 error of 2 requests: 50% > 30%.

        let s = selector().with_tracker(tracker);
        let result = s.select(&score(5), None);
        assert_eq!(result.tier, ModelTier::Sonnet);
        assert!(result.reason.contains("error rate"));
    }

    #[test]
    fn error_rate_capped_at_opus() {
        let tracker = Arc::new(UsageTracker::default());
        tracker.record_error("x", DEFAULT_OPUS);

        let s = selector().with_tracker(tracker);
        let result = s.select(&score(60), None);
        assert_eq!(result.tier, ModelTier::Opus);
    }

    #[test]
    fn blended_cost_formula() {
        let s = selector();
        // sonnet: (3 + 15) / 2 / 1000 = 0.009.
        let result = s.select(&score(20), None);
        assert!((result.blended_cost_per_1k - 0.009).abs() < 1e-12);
    }

    #[test]
    fn rewritten_level_overrides_score_band() {
        // Context influence rewrites the level without touching the score.
        let s = selector();
        let influenced = ComplexityScore {
            score: 5,
            level: ComplexityLevel::Complex,
            reasons: Vec::new(),
        };
        assert_eq!(s.select(&influenced, None).tier, ModelTier::Opus);
    }

    #[test]
    fn complex_scenario_end_to_end() {
        let analyzer = ComplexityAnalyzer::new();
        let s = selector();
        let complexity = analyzer.analyze_message(
            "Refactor the entire authentication module to use OAuth2 with PKCE flow. \
             Analyze the existing codebase, implement the migration plan, and update \
             all tests. This involves multiple files across the architecture.",
        );
        let result = s.select(&complexity, None);
        assert_eq!(result.model, DEFAULT_OPUS);
        assert!(result.reason.contains("complex"));
    }
}
