//! Context retrieval over the caller's search services.
//!
//! The [`ContextEngine`] consults two optional collaborators -- a
//! full-text [`TextSearch`] and a [`VectorSearch`] -- for messages similar
//! to the incoming request, merges their hits, and derives per-hit
//! [`ContextHint`]s: a tier vote with a confidence. The orchestrator lets
//! those hints overrule the complexity-derived tier only when the mean
//! confidence behind the winning tier reaches 0.5 and the tier actually
//! differs.
//!
//! Searches run under a deadline (default 2 seconds). A missing service,
//! a failed search, or a timeout all degrade to empty results -- context
//! is an accelerant, never a dependency.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use manifold_types::{ComplexityLevel, ModelTier};

use crate::complexity::ComplexityAnalyzer;

// ── Search collaborators ───────────────────────────────────────────────

/// A search service failure. The engine logs and swallows these.
#[derive(Error, Debug)]
#[error("search failed: {0}")]
pub struct SearchError(pub String);

/// One hit from either search service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// The matched message content.
    pub content: String,
    /// Relevance score; the engine clamps it to `[0, 1]` for confidence.
    pub score: f64,
    /// The session the message came from.
    pub session_key: String,
    /// The role of the matched message.
    pub role: String,
}

/// Full-text message search (e.g. an FTS5 index).
#[async_trait]
pub trait TextSearch: Send + Sync {
    /// Search stored messages for `query`, best matches first.
    async fn search_messages(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, SearchError>;
}

/// Embedding-based semantic search.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Search stored embeddings for `query`, best matches first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SearchError>;
}

// ── Hints ──────────────────────────────────────────────────────────────

/// A tier vote derived from one retrieved message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextHint {
    /// The tier the retrieved message's difficulty suggests.
    pub tier: ModelTier,
    /// Vote weight from the search score, `0.0..=1.0`.
    pub confidence: f64,
    /// The session the hint came from.
    pub session_key: String,
}

/// Everything the engine retrieved for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievedContext {
    /// Merged search hits, best first.
    pub snippets: Vec<SearchHit>,
    /// One hint per snippet.
    pub hints: Vec<ContextHint>,
}

impl RetrievedContext {
    /// Returns `true` when nothing was retrieved.
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// The hint-voted tier: sum confidence per tier, take the argmax, and
    /// report the **mean** confidence of the hints behind it. `None`
    /// without hints.
    pub fn suggested_tier(&self) -> Option<(ModelTier, f64)> {
        if self.hints.is_empty() {
            return None;
        }
        let mut sums: Vec<(ModelTier, f64, usize)> = Vec::new();
        for hint in &self.hints {
            match sums.iter_mut().find(|(tier, _, _)| *tier == hint.tier) {
                Some((_, sum, count)) => {
                    *sum += hint.confidence;
                    *count += 1;
                }
                None => sums.push((hint.tier, hint.confidence, 1)),
            }
        }
        sums.into_iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(tier, sum, count)| (tier, sum / count as f64))
    }
}

/// Mean hint confidence required before context may overrule complexity.
pub const CONTEXT_INFLUENCE_THRESHOLD: f64 = 0.5;

// ── ContextEngine ──────────────────────────────────────────────────────

/// Default per-search deadline.
pub const DEFAULT_SEARCH_DEADLINE: Duration = Duration::from_secs(2);

/// Default hit limit per search service.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Retrieval layer over the caller's search services.
pub struct ContextEngine {
    text: Option<Arc<dyn TextSearch>>,
    vector: Option<Arc<dyn VectorSearch>>,
    analyzer: ComplexityAnalyzer,
    deadline: Duration,
    limit: usize,
}

impl ContextEngine {
    /// Create an engine with no services attached (it retrieves nothing
    /// until one is wired in).
    pub fn new() -> Self {
        Self {
            text: None,
            vector: None,
            analyzer: ComplexityAnalyzer::new(),
            deadline: DEFAULT_SEARCH_DEADLINE,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    /// Attach a full-text search service.
    pub fn with_text_search(mut self, text: Arc<dyn TextSearch>) -> Self {
        self.text = Some(text);
        self
    }

    /// Attach a vector search service.
    pub fn with_vector_search(mut self, vector: Arc<dyn VectorSearch>) -> Self {
        self.vector = Some(vector);
        self
    }

    /// Set the per-search deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the hit limit per service.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Retrieve context for a request: query both services under the
    /// deadline, merge hits best-score-first, and derive one hint each.
    pub async fn retrieve(&self, request: &str) -> RetrievedContext {
        let mut hits: Vec<SearchHit> = Vec::new();

        if let Some(text) = &self.text {
            match tokio::time::timeout(self.deadline, text.search_messages(request, self.limit))
                .await
            {
                Ok(Ok(found)) => hits.extend(found),
                Ok(Err(err)) => warn!(%err, "text search failed; continuing without it"),
                Err(_) => warn!("text search timed out; continuing without it"),
            }
        }

        if let Some(vector) = &self.vector {
            match tokio::time::timeout(self.deadline, vector.search(request, self.limit)).await {
                Ok(Ok(found)) => hits.extend(found),
                Ok(Err(err)) => warn!(%err, "vector search failed; continuing without it"),
                Err(_) => warn!("vector search timed out; continuing without it"),
            }
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(self.limit);

        let hints = hits
            .iter()
            .map(|hit| {
                let level = self.analyzer.analyze_message(&hit.content).level;
                ContextHint {
                    tier: ModelTier::for_level(level),
                    confidence: hit.score.clamp(0.0, 1.0),
                    session_key: hit.session_key.clone(),
                }
            })
            .collect();

        debug!(snippets = hits.len(), "context retrieved");
        RetrievedContext {
            snippets: hits,
            hints,
        }
    }
}

impl Default for ContextEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// The canonical complexity level for a hint-suggested tier, used when the
/// orchestrator rewrites the routing level under context influence.
pub fn level_for_suggestion(tier: ModelTier) -> ComplexityLevel {
    ComplexityLevel::for_tier(tier)
}

// ── Tests ──────────────────────────────────────────────────────────────
