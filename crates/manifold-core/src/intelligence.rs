//! Signal merging and self-tuning for the routing core.
//!
//! [`RouterIntelligence`] sits between the history-keeping subsystems and
//! the orchestrator. Per request it collects at most one signal from each
//! of the pattern analyzer, the cost optimizer, and the usage predictor,
//! merges them into a single [`RoutingDecision`] by summed confidence, and
//! records the eventual outcome so the pattern store keeps learning.
//!
//! A bounded ring of [`RoutingOutcome`]s drives auto-tuning: when the
//! predicted tier keeps matching the actual tier, the cluster-confidence
//! threshold relaxes; when accuracy collapses, it tightens. The walk is
//! slow (0.02 per window) and clamped to `[0.2, 0.8]`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use manifold_types::{ComplexityLevel, ModelTier};

use crate::optimizer::CostOptimizer;
use crate::patterns::PatternAnalyzer;
use crate::predictor::{UsagePredictor, UsageTrend};
use crate::selector::SelectionResult;

// ── Signals ────────────────────────────────────────────────────────────

/// Which subsystem produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// Historical pattern cluster recommendation.
    PatternCluster,
    /// Cost-optimizer downgrade advice.
    CostOptimizer,
    /// Predictor budget-pressure adjustment.
    UsagePredictor,
}

/// One subsystem's vote: a tier and how sure it is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// The tier the subsystem wants.
    pub tier: ModelTier,
    /// Vote weight, `0.0..=1.0`.
    pub confidence: f64,
    /// Where the vote came from.
    pub source: SignalSource,
}

/// The merged decision handed to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// The winning tier.
    pub tier: ModelTier,
    /// Merged confidence, `0.0..=1.0`.
    pub confidence: f64,
    /// The subsystems that voted for the winning tier.
    pub sources: Vec<SignalSource>,
}

/// One observed routing outcome, kept for accuracy tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingOutcome {
    /// The request text (possibly truncated by the caller).
    pub request: String,
    /// Complexity score at routing time.
    pub complexity_score: u32,
    /// Tools offered with the request.
    pub tool_count: usize,
    /// The tier that actually served the request.
    pub actual_tier: ModelTier,
    /// The tier complexity analysis alone predicted.
    pub predicted_tier: ModelTier,
    /// Whether the request succeeded.
    pub success: bool,
    /// When the outcome was recorded.
    pub timestamp: DateTime<Utc>,
}

// ── Insights ───────────────────────────────────────────────────────────

/// Pattern-store health summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterHealth {
    /// Patterns currently stored.
    pub total_patterns: usize,
    /// Clusters in the latest build.
    pub cluster_count: usize,
    /// Mean cluster size.
    pub avg_cluster_size: f64,
    /// Member-weighted mean success rate.
    pub avg_success_rate: f64,
    /// At least two clusters and a success rate above one half.
    pub healthy: bool,
}

/// Cost direction summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostTrendReport {
    /// Direction of the cost series.
    pub trend: UsageTrend,
    /// Burn in USD per hour.
    pub burn_rate_per_hour: f64,
    /// Burn extrapolated over 24 hours.
    pub projected_daily_cost: f64,
    /// Spend as a fraction of the daily budget (zero without a budget).
    pub budget_utilization: f64,
}

/// The composite report [`RouterIntelligence::insights`] returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceInsights {
    /// Pattern-store health.
    pub cluster_health: ClusterHealth,
    /// Cost direction, when the predictor has enough data.
    pub cost_trend: Option<CostTrendReport>,
    /// Fraction of outcomes where prediction matched reality.
    pub prediction_accuracy: Option<f64>,
    /// Merged operator-facing suggestions.
    pub suggestions: Vec<String>,
}

// ── RouterIntelligence ─────────────────────────────────────────────────

/// Default outcome-ring capacity.
pub const DEFAULT_MAX_OUTCOMES: usize = 500;

/// Default auto-tune throttle window.
pub const DEFAULT_AUTO_TUNE_WINDOW: Duration = Duration::from_secs(300);

/// Outcomes required before auto-tune will move the threshold.
const AUTO_TUNE_MIN_OUTCOMES: usize = 10;

/// Threshold step per auto-tune evaluation.
const AUTO_TUNE_STEP: f64 = 0.02;

/// Threshold floor and ceiling.
const THRESHOLD_FLOOR: f64 = 0.2;
const THRESHOLD_CEILING: f64 = 0.8;

struct IntelligenceState {
    outcomes: VecDeque<RoutingOutcome>,
    confidence_threshold: f64,
    last_tune: Option<DateTime<Utc>>,
}

/// Merges subsystem signals and tunes itself against observed outcomes.
pub struct RouterIntelligence {
    state: RwLock<IntelligenceState>,
    patterns: Arc<PatternAnalyzer>,
    optimizer: Option<Arc<CostOptimizer>>,
    predictor: Option<Arc<UsagePredictor>>,
    max_outcomes: usize,
    auto_tune_window: Duration,
    daily_budget_usd: f64,
}

impl RouterIntelligence {
    /// Create an intelligence layer over a pattern analyzer. The optimizer
    /// and predictor are optional collaborators.
    pub fn new(patterns: Arc<PatternAnalyzer>) -> Self {
        Self {
            state: RwLock::new(IntelligenceState {
                outcomes: VecDeque::new(),
                confidence_threshold: 0.4,
                last_tune: None,
            }),
            patterns,
            optimizer: None,
            predictor: None,
            max_outcomes: DEFAULT_MAX_OUTCOMES,
            auto_tune_window: DEFAULT_AUTO_TUNE_WINDOW,
            daily_budget_usd: 0.0,
        }
    }

    /// Attach the cost optimizer.
    pub fn with_optimizer(mut self, optimizer: Arc<CostOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    /// Attach the usage predictor.
    pub fn with_predictor(mut self, predictor: Arc<UsagePredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// Set the starting cluster-confidence threshold.
    pub fn with_confidence_threshold(self, threshold: f64) -> Self {
        self.set_confidence_threshold(threshold);
        self
    }

    /// Reset the cluster-confidence threshold, clamped to the auto-tune
    /// bounds. `SmartRouter::with_intelligence` applies the configured
    /// value here when the layer is attached.
    pub fn set_confidence_threshold(&self, threshold: f64) {
        self.state
            .write()
            .expect("router intelligence lock poisoned")
            .confidence_threshold = threshold.clamp(THRESHOLD_FLOOR, THRESHOLD_CEILING);
    }

    /// Set the daily budget the predictor signal reasons about.
    pub fn with_daily_budget(mut self, budget_usd: f64) -> Self {
        self.daily_budget_usd = budget_usd;
        self
    }

    /// Cap the outcome ring.
    pub fn with_max_outcomes(mut self, max_outcomes: usize) -> Self {
        self.max_outcomes = max_outcomes.max(1);
        self
    }

    /// Set the auto-tune throttle window.
    pub fn with_auto_tune_window(mut self, window: Duration) -> Self {
        self.auto_tune_window = window;
        self
    }

    /// The current cluster-confidence threshold.
    pub fn confidence_threshold(&self) -> f64 {
        self.state
            .read()
            .expect("router intelligence lock poisoned")
            .confidence_threshold
    }

    /// Collect and merge the subsystem signals for a request heading to
    /// `current_tier`. `None` when no subsystem has anything to say.
    pub fn decide(
        &self,
        request_text: &str,
        complexity_score: u32,
        complexity_level: ComplexityLevel,
        tool_count: usize,
        current_tier: ModelTier,
    ) -> Option<RoutingDecision> {
        let threshold = self.confidence_threshold();
        let mut signals: Vec<Signal> = Vec::new();

        self.patterns.recluster_if_needed();
        if let Some(rec) =
            self.patterns
                .recommendation(request_text, complexity_score, complexity_level, tool_count)
            && rec.confidence >= threshold
        {
            signals.push(Signal {
                tier: rec.tier,
                confidence: rec.confidence,
                source: SignalSource::PatternCluster,
            });
        }

        if let Some(optimizer) = &self.optimizer
            && let Some(tier) = optimizer.should_downgrade(current_tier, complexity_level)
        {
            signals.push(Signal {
                tier,
                confidence: 0.7,
                source: SignalSource::CostOptimizer,
            });
        }

        if let Some(predictor) = &self.predictor
            && let Some(adjustment) = predictor.tier_adjustment(current_tier, self.daily_budget_usd)
        {
            signals.push(Signal {
                tier: adjustment.to,
                confidence: adjustment.urgency,
                source: SignalSource::UsagePredictor,
            });
        }

        let decision = merge_signals(&signals)?;
        debug!(
            tier = %decision.tier,
            confidence = decision.confidence,
            signals = signals.len(),
            "merged routing decision"
        );
        Some(decision)
    }

    /// Record a routing outcome and forward it to the pattern store.
    #[allow(clippy::too_many_arguments)]
    pub fn record_outcome(
        &self,
        selection: &SelectionResult,
        predicted_tier: ModelTier,
        request_text: &str,
        complexity_score: u32,
        complexity_level: ComplexityLevel,
        tool_count: usize,
        success: bool,
        latency_ms: u64,
        fallbacks: usize,
        context_influenced: bool,
    ) {
        self.patterns.record_pattern(
            selection,
            request_text,
            tool_count,
            success,
            latency_ms,
            fallbacks,
            context_influenced,
            complexity_score,
            complexity_level,
        );

        let mut state = self.state.write().expect("router intelligence lock poisoned");
        if state.outcomes.len() >= self.max_outcomes {
            state.outcomes.pop_front();
        }
        state.outcomes.push_back(RoutingOutcome {
            request: request_text.into(),
            complexity_score,
            tool_count,
            actual_tier: selection.tier,
            predicted_tier,
            success,
            timestamp: Utc::now(),
        });
    }

    /// Number of retained outcomes.
    pub fn outcome_count(&self) -> usize {
        self.state
            .read()
            .expect("router intelligence lock poisoned")
            .outcomes
            .len()
    }

    /// Fraction of outcomes where the predicted tier matched the actual
    /// tier. `None` before any outcome lands.
    pub fn prediction_accuracy(&self) -> Option<f64> {
        let state = self.state.read().expect("router intelligence lock poisoned");
        if state.outcomes.is_empty() {
            return None;
        }
        let matched = state
            .outcomes
            .iter()
            .filter(|o| o.predicted_tier == o.actual_tier)
            .count();
        Some(matched as f64 / state.outcomes.len() as f64)
    }

    /// Walk the confidence threshold against observed accuracy. Throttled
    /// to one evaluation per window; needs at least ten outcomes. Returns
    /// the threshold after the call.
    pub fn auto_tune(&self) -> f64 {
        let mut state = self.state.write().expect("router intelligence lock poisoned");
        let now = Utc::now();

        if let Some(last) = state.last_tune {
            let elapsed = (now - last).num_milliseconds().max(0) as u128;
            if elapsed < self.auto_tune_window.as_millis() {
                return state.confidence_threshold;
            }
        }
        if state.outcomes.len() < AUTO_TUNE_MIN_OUTCOMES {
            return state.confidence_threshold;
        }

        let matched = state
            .outcomes
            .iter()
            .filter(|o| o.predicted_tier == o.actual_tier)
            .count();
        let accuracy = matched as f64 / state.outcomes.len() as f64;

        let before = state.confidence_threshold;
        if accuracy > 0.8 {
            state.confidence_threshold = (before - AUTO_TUNE_STEP).max(THRESHOLD_FLOOR);
        } else if accuracy < 0.5 {
            state.confidence_threshold = (before + AUTO_TUNE_STEP).min(THRESHOLD_CEILING);
        }
        state.last_tune = Some(now);

        if (state.confidence_threshold - before).abs() > f64::EPSILON {
            info!(
                accuracy,
                from = before,
                to = state.confidence_threshold,
                "auto-tuned cluster confidence threshold"
            );
        }
        state.confidence_threshold
    }

    /// The composite health/trend/suggestion report.
    pub fn insights(&self) -> IntelligenceInsights {
        let (total_patterns, clusters) = self.patterns.health();
        let cluster_count = clusters.len();
        let member_total: usize = clusters.iter().map(|c| c.member_count).sum();
        let avg_cluster_size = if cluster_count == 0 {
            0.0
        } else {
            member_total as f64 / cluster_count as f64
        };
        let avg_success_rate = if member_total == 0 {
            0.0
        } else {
            clusters
                .iter()
                .map(|c| c.avg_success_rate * c.member_count as f64)
                .sum::<f64>()
                / member_total as f64
        };
        let cluster_health = ClusterHealth {
            total_patterns,
            cluster_count,
            avg_cluster_size,
            avg_success_rate,
            healthy: cluster_count >= 2 && avg_success_rate > 0.5,
        };

        let cost_trend = self.predictor.as_ref().and_then(|p| {
            let trend = p.cost_trend()?;
            let burn = p.burn_rate_per_hour();
            let utilization = p
                .budget_forecast(self.daily_budget_usd)
                .map(|f| f.utilization)
                .unwrap_or(0.0);
            Some(CostTrendReport {
                trend,
                burn_rate_per_hour: burn,
                projected_daily_cost: burn * 24.0,
                budget_utilization: utilization,
            })
        });

        let prediction_accuracy = self.prediction_accuracy();

        let mut suggestions: Vec<String> = Vec::new();
        if let Some(optimizer) = &self.optimizer {
            suggestions.extend(
                optimizer
                    .suggestions()
                    .into_iter()
                    .filter(|s| s.confidence > 0.5)
                    .map(|s| s.description),
            );
        }
        if self.outcome_count() < AUTO_TUNE_MIN_OUTCOMES {
            suggestions.push(
                "not enough routing outcomes yet for reliable auto-tuning".to_string(),
            );
        }
        if let Some(accuracy) = prediction_accuracy
            && accuracy < 0.5
        {
            suggestions.push(format!(
                "tier prediction accuracy is {:.0}%; complexity heuristics may need review",
                accuracy * 100.0
            ));
        }
        if cluster_count > 0 && avg_success_rate < 0.5 {
            suggestions.push(format!(
                "clustered request success rate is {:.0}%; inspect failing patterns",
                avg_success_rate * 100.0
            ));
        }
        if self.daily_budget_usd > 0.0
            && let Some(predictor) = &self.predictor
            && let Some(forecast) = predictor.budget_forecast(self.daily_budget_usd)
            && forecast.will_exhaust
        {
            suggestions.push(format!(
                "daily budget projected to exhaust ({})",
                forecast.recommended_action
            ));
        }

        IntelligenceInsights {
            cluster_health,
            cost_trend,
            prediction_accuracy,
            suggestions,
        }
    }
}

/// Merge signals by summed confidence per tier: single signal passes
/// through; multiple pick the argmax tier with normalized confidence.
fn merge_signals(signals: &[Signal]) -> Option<RoutingDecision> {
    match signals {
        [] => None,
        [only] => Some(RoutingDecision {
            tier: only.tier,
            confidence: only.confidence.clamp(0.0, 1.0),
            sources: vec![only.source],
        }),
        many => {
            let mut per_tier: HashMap<ModelTier, f64> = HashMap::new();
            for signal in many {
                *per_tier.entry(signal.tier).or_default() += signal.confidence;
            }
            let total: f64 = many.iter().map(|s| s.confidence).sum();
            let (tier, best_sum) = per_tier
                .into_iter()
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;
            let sources = many
                .iter()
                .filter(|s| s.tier == tier)
                .map(|s| s.source)
                .collect();
            Some(RoutingDecision {
                tier,
                confidence: (best_sum / total).clamp(0.0, 1.0),
                sources,
            })
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use manifold_types::{ModelAliases, PricingTable};

    fn selection(tier: ModelTier) -> SelectionResult {
        let aliases = ModelAliases::default();
        SelectionResult {
            model: aliases.resolve(tier).to_string(),
            tier,
            reason: "test".into(),
            blended_cost_per_1k: 0.0,
            overridden: false,
        }
    }

    fn intelligence() -> RouterIntelligence {
        RouterIntelligence::new(Arc::new(PatternAnalyzer::new()))
    }

    fn record_matching(intel: &RouterIntelligence, count: usize, tier: ModelTier) {
        for i in 0..count {
            intel.record_outcome(
                &selection(tier),
                tier,
                &format!("request {i}"),
                20,
                ComplexityLevel::Standard,
                0,
                true,
                100,
                0,
                false,
            );
        }
    }

    fn record_mismatched(intel: &RouterIntelligence, count: usize) {
        for i in 0..count {
            intel.record_outcome(
                &selection(ModelTier::Haiku),
                ModelTier::Opus,
                &format!("miss {i}"),
                80,
                ComplexityLevel::Complex,
                0,
                true,
                100,
                0,
                false,
            );
        }
    }

    // ── merge_signals ──────────────────────────────────────────────

    #[test]
    fn no_signals_no_decision() {
        assert!(merge_signals(&[]).is_none());
    }

    #[test]
    fn single_signal_passes_through() {
        let decision = merge_signals(&[Signal {
            tier: ModelTier::Haiku,
            confidence: 0.7,
            source: SignalSource::CostOptimizer,
        }])
        .unwrap();
        assert_eq!(decision.tier, ModelTier::Haiku);
        assert!((decision.confidence - 0.7).abs() < f64::EPSILON);
        assert_eq!(decision.sources, vec![SignalSource::CostOptimizer]);
    }

    #[test]
    fn agreeing_signals_sum_confidence() {
        let decision = merge_signals(&[
            Signal {
                tier: ModelTier::Haiku,
                confidence: 0.7,
                source: SignalSource::CostOptimizer,
            },
            Signal {
                tier: ModelTier::Haiku,
                confidence: 0.5,
                source: SignalSource::PatternCluster,
            },
        ])
        .unwrap();
        assert_eq!(decision.tier, ModelTier::Haiku);
        // Full agreement: normalized confidence is 1.0.
        assert!((decision.confidence - 1.0).abs() < 1e-9);
        assert_eq!(decision.sources.len(), 2);
    }

    #[test]
    fn conflicting_signals_pick_heavier_tier() {
        let decision = merge_signals(&[
            Signal {
                tier: ModelTier::Haiku,
                confidence: 0.4,
                source: SignalSource::PatternCluster,
            },
            Signal {
                tier: ModelTier::Sonnet,
                confidence: 0.7,
                source: SignalSource::CostOptimizer,
            },
            Signal {
                tier: ModelTier::Sonnet,
                confidence: 0.4,
                source: SignalSource::UsagePredictor,
            },
        ])
        .unwrap();
        assert_eq!(decision.tier, ModelTier::Sonnet);
        // 1.1 of 1.5 total.
        assert!((decision.confidence - 1.1 / 1.5).abs() < 1e-9);
        assert_eq!(decision.sources.len(), 2);
    }

    // ── decide ─────────────────────────────────────────────────────

    #[test]
    fn decide_with_no_subsystem_data_is_none() {
        let intel = intelligence();
        assert!(
            intel
                .decide("hello", 5, ComplexityLevel::Simple, 0, ModelTier::Haiku)
                .is_none()
        );
    }

    #[test]
    fn decide_picks_up_optimizer_downgrade() {
        let optimizer = Arc::new(CostOptimizer::new(
            PricingTable::builtin(),
            ModelAliases::default(),
        ));
        let intel = intelligence().with_optimizer(optimizer);
        // Best-effort policy downgrades simple-on-opus regardless of budget.
        let decision = intel
            .decide("hi", 5, ComplexityLevel::Simple, 0, ModelTier::Opus)
            .expect("optimizer should vote");
        assert_eq!(decision.tier, ModelTier::Haiku);
        assert_eq!(decision.sources, vec![SignalSource::CostOptimizer]);
    }

    #[test]
    fn decide_picks_up_cluster_recommendation() {
        let patterns = Arc::new(PatternAnalyzer::new());
        let intel = RouterIntelligence::new(patterns.clone());
        for i in 0..20 {
            patterns.record_pattern(
                &selection(ModelTier::Haiku),
                &format!("quick question {i}"),
                0,
                true,
                100,
                0,
                false,
                5,
                ComplexityLevel::Simple,
            );
        }
        let decision = intel
            .decide(
                "quick question again",
                5,
                ComplexityLevel::Simple,
                0,
                ModelTier::Haiku,
            )
            .expect("cluster should vote");
        assert_eq!(decision.tier, ModelTier::Haiku);
        assert_eq!(decision.sources, vec![SignalSource::PatternCluster]);
    }

    // ── Outcomes and accuracy ──────────────────────────────────────

    #[test]
    fn outcome_ring_bounded() {
        let intel = intelligence().with_max_outcomes(5);
        record_matching(&intel, 8, ModelTier::Sonnet);
        assert_eq!(intel.outcome_count(), 5);
    }

    #[test]
    fn accuracy_over_outcomes() {
        let intel = intelligence();
        assert!(intel.prediction_accuracy().is_none());

        record_matching(&intel, 3, ModelTier::Sonnet);
        record_mismatched(&intel, 1);
        let accuracy = intel.prediction_accuracy().unwrap();
        assert!((accuracy - 0.75).abs() < 1e-9);
    }

    #[test]
    fn outcomes_feed_pattern_store() {
        let patterns = Arc::new(PatternAnalyzer::new());
        let intel = RouterIntelligence::new(patterns.clone());
        record_matching(&intel, 4, ModelTier::Sonnet);
        assert_eq!(patterns.pattern_count(), 4);
    }

    // ── Auto-tune ──────────────────────────────────────────────────

    #[test]
    fn auto_tune_needs_ten_outcomes() {
        let intel = intelligence();
        record_matching(&intel, 9, ModelTier::Sonnet);
        assert!((intel.auto_tune() - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn high_accuracy_relaxes_threshold() {
        let intel = intelligence();
        record_matching(&intel, 12, ModelTier::Sonnet);
        let tuned = intel.auto_tune();
        assert!((tuned - 0.38).abs() < 1e-9);
    }

    #[test]
    fn low_accuracy_tightens_threshold() {
        let intel = intelligence();
        record_mismatched(&intel, 12);
        let tuned = intel.auto_tune();
        assert!((tuned - 0.42).abs() < 1e-9);
    }

    #[test]
    fn auto_tune_throttled_within_window() {
        let intel = intelligence();
        record_matching(&intel, 12, ModelTier::Sonnet);
        let first = intel.auto_tune();
        // Second call inside the window is a no-op.
        let second = intel.auto_tune();
        assert!((first - second).abs() < f64::EPSILON);
    }

    #[test]
    fn threshold_setter_clamps_to_bounds() {
        let intel = intelligence();
        intel.set_confidence_threshold(0.9);
        assert!((intel.confidence_threshold() - 0.8).abs() < f64::EPSILON);
        intel.set_confidence_threshold(0.1);
        assert!((intel.confidence_threshold() - 0.2).abs() < f64::EPSILON);
        intel.set_confidence_threshold(0.55);
        assert!((intel.confidence_threshold() - 0.55).abs() < f64::EPSILON);
    }

    #[test]
    fn auto_tune_respects_floor() {
        let intel = intelligence()
            .with_confidence_threshold(0.2)
            .with_auto_tune_window(Duration::ZERO);
        record_matching(&intel, 12, ModelTier::Sonnet);
        assert!((intel.auto_tune() - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn auto_tune_respects_ceiling() {
        let intel = intelligence()
            .with_confidence_threshold(0.8)
            .with_auto_tune_window(Duration::ZERO);
        record_mismatched(&intel, 12);
        assert!((intel.auto_tune() - 0.8).abs() < f64::EPSILON);
    }

    // ── Insights ───────────────────────────────────────────────────

    #[test]
    fn insights_on_empty_state() {
        let intel = intelligence();
        let insights = intel.insights();
        assert_eq!(insights.cluster_health.total_patterns, 0);
        assert!(!insights.cluster_health.healthy);
        assert!(insights.cost_trend.is_none());
        assert!(insights.prediction_accuracy.is_none());
        assert!(
            insights
                .suggestions
                .iter()
                .any(|s| s.contains("not enough routing outcomes"))
        );
    }

    #[test]
    fn insights_flag_low_accuracy() {
        let intel = intelligence();
        record_mismatched(&intel, 12);
        let insights = intel.insights();
        assert!(
            insights
                .suggestions
                .iter()
                .any(|s| s.contains("accuracy"))
        );
    }

    #[test]
    fn insights_include_optimizer_suggestions() {
        let optimizer = Arc::new(CostOptimizer::new(
            PricingTable::builtin(),
            ModelAliases::default(),
        ));
        for _ in 0..20 {
            optimizer.record(
                "claude-sonnet-4-6",
                ModelTier::Sonnet,
                ComplexityLevel::Simple,
                5000,
                2000,
            );
        }
        let intel = intelligence().with_optimizer(optimizer);
        let insights = intel.insights();
        assert!(insights.suggestions.iter().any(|s| s.contains("simple")));
    }

    #[test]
    fn healthy_clusters_reported() {
        let patterns = Arc::new(PatternAnalyzer::new());
        for i in 0..4 {
            patterns.record_pattern(
                &selection(ModelTier::Haiku),
                &format!("hi {i}"),
                0,
                true,
                100,
                0,
                false,
                0,
                ComplexityLevel::Simple,
            );
        }
        for i in 0..4 {
            patterns.record_pattern(
                &selection(ModelTier::Opus),
                &format!("refactor module {i} {}", "details ".repeat(60)),
                12,
                true,
                100,
                0,
                false,
                60,
                ComplexityLevel::Complex,
            );
        }
        patterns.recluster_if_needed();
        let intel = RouterIntelligence::new(patterns);
        let insights = intel.insights();
        assert_eq!(insights.cluster_health.cluster_count, 2);
        assert!(insights.cluster_health.healthy);
        assert!((insights.cluster_health.avg_success_rate - 1.0).abs() < 1e-9);
    }
}
