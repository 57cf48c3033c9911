//! Historical request-pattern clustering.
//!
//! Every routed request leaves a [`RequestPattern`] behind: its complexity,
//! shape, outcome, and a cached fixed-dimension feature vector. The
//! analyzer greedily clusters those vectors by cosine similarity and, for
//! a new request, recommends the model that dominated the most similar
//! cluster.
//!
//! The feature space is six fixed dimensions, each linearly normalized to
//! `[0, 1]` against a fixed range and then scaled by a per-dimension
//! weight, so complexity score and level dominate the distance metric.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use fnv::FnvHasher;
use serde::{Deserialize, Serialize};
use tracing::debug;

use manifold_types::{ComplexityLevel, ModelTier};

use crate::selector::SelectionResult;

// ── Feature vectors ────────────────────────────────────────────────────

/// Number of feature dimensions.
pub const FEATURE_DIMS: usize = 6;

/// Normalization range per dimension: complexity score, tool count,
/// message length, word count, complexity level, context-influenced.
pub const FEATURE_RANGES: [f64; FEATURE_DIMS] = [100.0, 20.0, 5000.0, 500.0, 2.0, 1.0];

/// Weight per dimension after normalization.
pub const FEATURE_WEIGHTS: [f64; FEATURE_DIMS] = [3.0, 1.5, 1.0, 1.0, 2.5, 0.5];

/// A weighted, normalized point in the six-dimensional feature space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_DIMS]);

impl FeatureVector {
    /// Normalize raw feature values: clamp each dimension to its range,
    /// scale to `[0, 1]`, then weight. Every component of the result lies
    /// in `[0, weight_d]`.
    pub fn from_raw(raw: [f64; FEATURE_DIMS]) -> Self {
        let mut v = [0.0; FEATURE_DIMS];
        for d in 0..FEATURE_DIMS {
            let normalized = (raw[d] / FEATURE_RANGES[d]).clamp(0.0, 1.0);
            v[d] = normalized * FEATURE_WEIGHTS[d];
        }
        Self(v)
    }

    /// Cosine similarity with another vector, zero when either is zero.
    pub fn cosine(&self, other: &FeatureVector) -> f64 {
        let mut dot = 0.0;
        let mut norm_a = 0.0;
        let mut norm_b = 0.0;
        for d in 0..FEATURE_DIMS {
            dot += self.0[d] * other.0[d];
            norm_a += self.0[d] * self.0[d];
            norm_b += other.0[d] * other.0[d];
        }
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }

    /// Arithmetic mean of a non-empty set of vectors.
    pub fn mean(vectors: &[FeatureVector]) -> FeatureVector {
        let mut sum = [0.0; FEATURE_DIMS];
        for v in vectors {
            for d in 0..FEATURE_DIMS {
                sum[d] += v.0[d];
            }
        }
        let n = vectors.len().max(1) as f64;
        for component in &mut sum {
            *component /= n;
        }
        FeatureVector(sum)
    }
}

// ── RequestPattern ─────────────────────────────────────────────────────

/// One historical routed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPattern {
    /// Synthetic id: `pat-<hash8>-<timestamp nanos>`.
    pub id: String,
    /// When the request was recorded.
    pub timestamp: DateTime<Utc>,
    /// Complexity score at routing time.
    pub complexity_score: u32,
    /// Complexity level at routing time.
    pub complexity_level: ComplexityLevel,
    /// Tools offered with the request.
    pub tool_count: usize,
    /// Message length in characters.
    pub message_length: usize,
    /// Message length in words.
    pub word_count: usize,
    /// The model that served the request.
    pub model: String,
    /// The tier that served the request.
    pub tier: ModelTier,
    /// Whether the request succeeded.
    pub success: bool,
    /// End-to-end latency in milliseconds.
    pub latency_ms: u64,
    /// How many fallback models were attempted.
    pub fallbacks: usize,
    /// Whether retrieved context changed the routing level.
    pub context_influenced: bool,
    /// Cached feature vector.
    pub features: FeatureVector,
}

/// A cluster of similar historical requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternCluster {
    /// Generated id, stable within one clustering pass.
    pub id: String,
    /// Human-readable summary.
    pub description: String,
    /// Number of member patterns.
    pub member_count: usize,
    /// Most frequent model among members.
    pub dominant_model: String,
    /// Most frequent tier among members.
    pub dominant_tier: ModelTier,
    /// Fraction of members that succeeded.
    pub avg_success_rate: f64,
    /// Mean member latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Mean member complexity score.
    pub avg_complexity: f64,
    /// Arithmetic mean of member feature vectors.
    pub centroid: FeatureVector,
    /// Member pattern ids.
    pub member_ids: Vec<String>,
}

/// A routing recommendation from the most similar cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRecommendation {
    /// The cluster that matched.
    pub cluster_id: String,
    /// The cluster's dominant model.
    pub model: String,
    /// The cluster's dominant tier.
    pub tier: ModelTier,
    /// Centroid similarity of the query, `0.0..=1.0`.
    pub similarity: f64,
    /// Blended confidence in the recommendation, `0.0..=1.0`.
    pub confidence: f64,
}

// ── PatternAnalyzer ────────────────────────────────────────────────────

/// Default rolling cap on stored patterns.
pub const DEFAULT_MAX_PATTERNS: usize = 1000;

/// Default cosine threshold for joining a cluster.
pub const DEFAULT_CLUSTER_THRESHOLD: f64 = 0.70;

/// Default minimum members for a cluster to survive.
pub const DEFAULT_MIN_CLUSTER_SIZE: usize = 3;

/// Default new-pattern count between re-clustering passes.
pub const DEFAULT_RECLUSTER_INTERVAL: usize = 50;

struct AnalyzerState {
    patterns: Vec<RequestPattern>,
    index: HashMap<String, usize>,
    clusters: Vec<PatternCluster>,
    since_last_cluster: usize,
}

/// Rolling-window pattern store and greedy single-pass clusterer.
pub struct PatternAnalyzer {
    state: RwLock<AnalyzerState>,
    max_patterns: usize,
    cluster_threshold: f64,
    min_cluster_size: usize,
    recluster_interval: usize,
}

impl PatternAnalyzer {
    /// Create an analyzer with the default caps and thresholds.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(AnalyzerState {
                patterns: Vec::new(),
                index: HashMap::new(),
                clusters: Vec::new(),
                since_last_cluster: 0,
            }),
            max_patterns: DEFAULT_MAX_PATTERNS,
            cluster_threshold: DEFAULT_CLUSTER_THRESHOLD,
            min_cluster_size: DEFAULT_MIN_CLUSTER_SIZE,
            recluster_interval: DEFAULT_RECLUSTER_INTERVAL,
        }
    }

    /// Cap the pattern store (oldest evict first).
    pub fn with_max_patterns(mut self, max_patterns: usize) -> Self {
        self.max_patterns = max_patterns.max(1);
        self
    }

    /// Set the cosine threshold for cluster membership.
    pub fn with_cluster_threshold(mut self, threshold: f64) -> Self {
        self.cluster_threshold = threshold;
        self
    }

    /// Set the minimum surviving cluster size.
    pub fn with_min_cluster_size(mut self, size: usize) -> Self {
        self.min_cluster_size = size.max(1);
        self
    }

    /// Set how many new patterns trigger a re-clustering pass.
    pub fn with_recluster_interval(mut self, interval: usize) -> Self {
        self.recluster_interval = interval.max(1);
        self
    }

    /// Record a routed request. Evicts the oldest pattern at the cap and
    /// rebuilds the id index when it does.
    #[allow(clippy::too_many_arguments)]
    pub fn record_pattern(
        &self,
        selection: &SelectionResult,
        request_text: &str,
        tool_count: usize,
        success: bool,
        latency_ms: u64,
        fallbacks: usize,
        context_influenced: bool,
        complexity_score: u32,
        complexity_level: ComplexityLevel,
    ) -> String {
        let timestamp = Utc::now();
        let id = pattern_id(request_text, timestamp);
        let word_count = request_text.split_whitespace().count();
        let features = FeatureVector::from_raw([
            complexity_score as f64,
            tool_count as f64,
            request_text.len() as f64,
            word_count as f64,
            complexity_level.rank() as f64,
            if context_influenced { 1.0 } else { 0.0 },
        ]);

        let pattern = RequestPattern {
            id: id.clone(),
            timestamp,
            complexity_score,
            complexity_level,
            tool_count,
            message_length: request_text.len(),
            word_count,
            model: selection.model.clone(),
            tier: selection.tier,
            success,
            latency_ms,
            fallbacks,
            context_influenced,
            features,
        };

        let mut state = self.state.write().expect("pattern analyzer lock poisoned");
        if state.patterns.len() >= self.max_patterns {
            let evicted = state.patterns.remove(0);
            debug!(id = %evicted.id, "pattern evicted at cap");
            rebuild_index(&mut state);
        }
        let position = state.patterns.len();
        state.index.insert(id.clone(), position);
        state.patterns.push(pattern);
        state.since_last_cluster += 1;
        id
    }

    /// Number of stored patterns.
    pub fn pattern_count(&self) -> usize {
        self.state
            .read()
            .expect("pattern analyzer lock poisoned")
            .patterns
            .len()
    }

    /// Whether a pattern id is still indexed.
    pub fn contains(&self, id: &str) -> bool {
        self.state
            .read()
            .expect("pattern analyzer lock poisoned")
            .index
            .contains_key(id)
    }

    /// Deep-copied view of the current clusters, largest first.
    pub fn clusters(&self) -> Vec<PatternCluster> {
        self.state
            .read()
            .expect("pattern analyzer lock poisoned")
            .clusters
            .clone()
    }

    /// Re-cluster when enough new patterns have arrived. Short-circuits
    /// unless at least `min_cluster_size` patterns exist and either no
    /// clusters have been built yet or `recluster_interval` new patterns
    /// landed since the last pass.
    pub fn recluster_if_needed(&self) -> bool {
        let mut state = self.state.write().expect("pattern analyzer lock poisoned");
        if state.patterns.len() < self.min_cluster_size {
            return false;
        }
        if !state.clusters.is_empty() && state.since_last_cluster < self.recluster_interval {
            return false;
        }
        self.build_clusters(&mut state);
        true
    }

    /// Recommend a model for a new request from the most similar cluster.
    /// Returns `None` when no cluster clears `0.8 x cluster_threshold`.
    pub fn recommendation(
        &self,
        request_text: &str,
        complexity_score: u32,
        complexity_level: ComplexityLevel,
        tool_count: usize,
    ) -> Option<ClusterRecommendation> {
        let query = FeatureVector::from_raw([
            complexity_score as f64,
            tool_count as f64,
            request_text.len() as f64,
            request_text.split_whitespace().count() as f64,
            complexity_level.rank() as f64,
            0.0,
        ]);

        let state = self.state.read().expect("pattern analyzer lock poisoned");
        let (best, similarity) = state
            .clusters
            .iter()
            .map(|c| (c, query.cosine(&c.centroid)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

        if similarity < 0.8 * self.cluster_threshold {
            return None;
        }

        let size_factor = (best.member_count as f64 / 50.0).min(1.0);
        let confidence =
            (0.5 * similarity + 0.25 * best.avg_success_rate + 0.25 * size_factor).clamp(0.0, 1.0);

        Some(ClusterRecommendation {
            cluster_id: best.id.clone(),
            model: best.dominant_model.clone(),
            tier: best.dominant_tier,
            similarity,
            confidence,
        })
    }

    /// Total patterns and weighted success rate, for the insights report.
    pub fn health(&self) -> (usize, Vec<PatternCluster>) {
        let state = self.state.read().expect("pattern analyzer lock poisoned");
        (state.patterns.len(), state.clusters.clone())
    }

    // Greedy single-pass clustering in time order.
    fn build_clusters(&self, state: &mut AnalyzerState) {
        struct Draft {
            members: Vec<usize>,
            centroid: FeatureVector,
        }

        let mut drafts: Vec<Draft> = Vec::new();
        for (idx, pattern) in state.patterns.iter().enumerate() {
            let best = drafts
                .iter_mut()
                .map(|d| {
                    let sim = pattern.features.cosine(&d.centroid);
                    (d, sim)
                })
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            match best {
                Some((draft, sim)) if sim >= self.cluster_threshold => {
                    draft.members.push(idx);
                    let vectors: Vec<FeatureVector> = draft
                        .members
                        .iter()
                        .map(|i| state.patterns[*i].features)
                        .collect();
                    draft.centroid = FeatureVector::mean(&vectors);
                }
                _ => drafts.push(Draft {
                    members: vec![idx],
                    centroid: pattern.features,
                }),
            }
        }

        drafts.retain(|d| d.members.len() >= self.min_cluster_size);
        drafts.sort_by(|a, b| b.members.len().cmp(&a.members.len()));

        state.clusters = drafts
            .iter()
            .enumerate()
            .map(|(i, draft)| summarize(i, draft.centroid, &draft.members, &state.patterns))
            .collect();
        state.since_last_cluster = 0;
        debug!(
            clusters = state.clusters.len(),
            patterns = state.patterns.len(),
            "patterns re-clustered"
        );
    }
}

impl Default for PatternAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn pattern_id(request_text: &str, timestamp: DateTime<Utc>) -> String {
    let mut hasher = FnvHasher::default();
    hasher.write(request_text.as_bytes());
    let hash8 = format!("{:016x}", hasher.finish());
    let nanos = timestamp.timestamp_nanos_opt().unwrap_or_default();
    format!("pat-{}-{nanos}", &hash8[..8])
}

fn rebuild_index(state: &mut AnalyzerState) {
    state.index = state
        .patterns
        .iter()
        .enumerate()
        .map(|(i, p)| (p.id.clone(), i))
        .collect();
}

fn summarize(
    ordinal: usize,
    centroid: FeatureVector,
    members: &[usize],
    patterns: &[RequestPattern],
) -> PatternCluster {
    let n = members.len().max(1) as f64;

    let mut model_votes: HashMap<&str, usize> = HashMap::new();
    let mut tier_votes: HashMap<ModelTier, usize> = HashMap::new();
    let mut successes = 0usize;
    let mut latency_sum = 0u64;
    let mut complexity_sum = 0u64;
    for idx in members {
        let p = &patterns[*idx];
        *model_votes.entry(p.model.as_str()).or_default() += 1;
        *tier_votes.entry(p.tier).or_default() += 1;
        if p.success {
            successes += 1;
        }
        latency_sum += p.latency_ms;
        complexity_sum += u64::from(p.complexity_score);
    }

    let dominant_model = model_votes
        .into_iter()
        .max_by_key(|(_, votes)| *votes)
        .map(|(model, _)| model.to_string())
        .unwrap_or_default();
    let dominant_tier = tier_votes
        .into_iter()
        .max_by_key(|(_, votes)| *votes)
        .map(|(tier, _)| tier)
        .unwrap_or(ModelTier::Sonnet);

    PatternCluster {
        id: format!("cluster-{ordinal}"),
        description: format!(
            "{} requests, mostly {dominant_model} ({dominant_tier})",
            members.len()
        ),
        member_count: members.len(),
        dominant_model,
        dominant_tier,
        avg_success_rate: successes as f64 / n,
        avg_latency_ms: latency_sum as f64 / n,
        avg_complexity: complexity_sum as f64 / n,
        centroid,
        member_ids: members.iter().map(|i| patterns[*i].id.clone()).collect(),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
