//! The smart-routing entry point.
//!
//! [`SmartRouter`] ties the whole core together for one request: complexity
//! analysis, optional context influence, model selection, the provider
//! call, and the fallback chain with backoff. Every collaborator besides
//! the provider and the usage tracker is optional; the router degrades to
//! plain complexity-based selection when the intelligence layers are
//! absent.
//!
//! Error policy: a non-retryable provider error surfaces immediately.
//! Retryable errors (rate limits, 5xx, timeouts, overload) record an
//! error against the model, wait out a backoff, and move down the
//! fallback chain. When the chain runs dry the last error comes back
//! wrapped in [`ProviderError::AllModelsExhausted`].

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use manifold_llm::{
    BackoffPolicy, ChatMessage, ChatRequest, ChatResponse, Provider, ProviderError, Result,
    ToolCall, ToolDefinition, is_retryable,
};
use manifold_types::{ModelTier, RouterConfig};

use crate::complexity::{ComplexityAnalyzer, ComplexityScore};
use crate::context::{CONTEXT_INFLUENCE_THRESHOLD, ContextEngine, level_for_suggestion};
use crate::external::{AgentSystem, SessionStore};
use crate::intelligence::RouterIntelligence;
use crate::selector::{ModelSelector, SelectionResult};
use crate::usage::UsageTracker;

// ── Request / result types ─────────────────────────────────────────────

/// One request entering the router.
#[derive(Debug, Clone, Default)]
pub struct RouteRequest {
    /// Session the request belongs to.
    pub session_key: String,
    /// The user message.
    pub message: String,
    /// Tools offered with the request.
    pub tools: Vec<ToolDefinition>,
    /// Caller-requested model, bypassing selection.
    pub requested_model: Option<String>,
    /// Generation cap forwarded to the provider.
    pub max_tokens: Option<u32>,
    /// Steps already taken in an in-flight tool chain.
    pub chain_steps: u32,
    /// Tool calls already made in the chain.
    pub tool_history: Vec<ToolCall>,
}

impl RouteRequest {
    /// Create a bare request.
    pub fn new(session_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Routing metadata attached to a smart-routed response.
///
/// The context fields are always populated -- explicit zero values when no
/// context engine is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingMetadata {
    /// The model that produced the response.
    pub model: String,
    /// The tier that served the request.
    pub tier: ModelTier,
    /// Why that model was chosen.
    pub reason: String,
    /// The combined complexity score.
    pub complexity_score: u32,
    /// The complexity level the request routed at.
    pub complexity_level: manifold_types::ComplexityLevel,
    /// Estimated input tokens handed to selection.
    pub estimated_input_tokens: u64,
    /// How many fallback models were attempted after the primary.
    pub fallbacks_attempted: usize,
    /// End-to-end latency in milliseconds.
    pub latency_ms: u64,
    /// Whether retrieved context rewrote the routing level.
    pub context_influenced: bool,
    /// Snippets the context engine retrieved.
    pub context_snippets: usize,
    /// Hints the context engine derived.
    pub context_hints: usize,
    /// The hint-voted tier, when hints existed.
    pub context_suggested_tier: Option<ModelTier>,
    /// Mean confidence behind the suggested tier.
    pub context_hint_confidence: f64,
}

/// The outcome of one routed request.
#[derive(Debug, Clone)]
pub struct SmartRoutingResult {
    /// The provider response.
    pub response: ChatResponse,
    /// Routing metadata; `None` when smart routing is disabled.
    pub decision: Option<RoutingMetadata>,
}

// ── SmartRouter ────────────────────────────────────────────────────────

/// Per-request orchestrator over the routing core.
pub struct SmartRouter {
    provider: Arc<dyn Provider>,
    tracker: Arc<UsageTracker>,
    analyzer: ComplexityAnalyzer,
    selector: ModelSelector,
    intelligence: Option<Arc<RouterIntelligence>>,
    context: Option<Arc<ContextEngine>>,
    session: Option<Arc<dyn SessionStore>>,
    agent: Option<Arc<dyn AgentSystem>>,
    backoff: BackoffPolicy,
    config: RouterConfig,
}

impl SmartRouter {
    /// Create a router over a provider and the shared usage tracker.
    pub fn new(
        provider: Arc<dyn Provider>,
        tracker: Arc<UsageTracker>,
        config: RouterConfig,
    ) -> Self {
        let selector = ModelSelector::new(&config.aliases, tracker.pricing().clone())
            .with_tracker(tracker.clone())
            .with_daily_budget(config.daily_budget_usd);
        Self {
            provider,
            tracker,
            analyzer: ComplexityAnalyzer::new(),
            selector,
            intelligence: None,
            context: None,
            session: None,
            agent: None,
            backoff: BackoffPolicy::default(),
            config,
        }
    }

    /// Attach the signal-merging intelligence layer. The configured
    /// `confidence_threshold` seeds the layer's starting point; auto-tune
    /// walks it from there.
    pub fn with_intelligence(mut self, intelligence: Arc<RouterIntelligence>) -> Self {
        intelligence.set_confidence_threshold(self.config.confidence_threshold);
        self.intelligence = Some(intelligence);
        self
    }

    /// Attach the context engine.
    pub fn with_context_engine(mut self, context: Arc<ContextEngine>) -> Self {
        self.context = Some(context);
        self
    }

    /// Attach the session store used for token estimates.
    pub fn with_session_store(mut self, session: Arc<dyn SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    /// Attach an agent system (system prompt, extra tools, post-processing).
    pub fn with_agent(mut self, agent: Arc<dyn AgentSystem>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Replace the backoff policy (tests use millisecond delays).
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Route one request.
    pub async fn route(&self, request: &RouteRequest) -> Result<SmartRoutingResult> {
        if !self.config.smart_routing {
            return self.route_plain(request).await;
        }

        let started = Instant::now();

        // Complexity from every available signal.
        let message_score = self.analyzer.analyze_message(&request.message);
        let tools_score = self.analyzer.analyze_tool_definitions(&self.all_tools(request));
        let mut scores = vec![message_score, tools_score];
        if request.chain_steps > 0 || !request.tool_history.is_empty() {
            scores.push(
                self.analyzer
                    .analyze_tool_chain_depth(request.chain_steps, &request.tool_history),
            );
        }
        let mut combined = self.analyzer.combine(scores);
        let predicted_tier = ModelTier::for_level(combined.level);

        // Context influence.
        let mut context_influenced = false;
        let mut context_snippets = 0;
        let mut context_hints = 0;
        let mut context_suggested_tier = None;
        let mut context_hint_confidence = 0.0;
        if let Some(engine) = &self.context {
            let retrieved = engine.retrieve(&request.message).await;
            context_snippets = retrieved.snippets.len();
            context_hints = retrieved.hints.len();
            if let Some((suggested, mean_confidence)) = retrieved.suggested_tier() {
                context_suggested_tier = Some(suggested);
                context_hint_confidence = mean_confidence;
                if mean_confidence >= CONTEXT_INFLUENCE_THRESHOLD && suggested != predicted_tier {
                    combined.level = level_for_suggestion(suggested);
                    combined
                        .reasons
                        .push(format!("context suggests {suggested} tier"));
                    context_influenced = true;
                    debug!(%suggested, mean_confidence, "context rewrote routing level");
                }
            }
        }

        let estimated_input_tokens = self.estimate_input_tokens(request).await;
        let mut selection = self
            .selector
            .select(&combined, request.requested_model.as_deref());

        // Merged subsystem signals may still cheapen a non-overridden pick.
        if !selection.overridden
            && let Some(intelligence) = &self.intelligence
            && let Some(decision) = intelligence.decide(
                &request.message,
                combined.score,
                combined.level,
                request.tools.len(),
                selection.tier,
            )
            && decision.confidence >= 0.5
            && decision.tier < selection.tier
        {
            let model = self.selector.table().model_for_tier(decision.tier).to_string();
            let blended_cost_per_1k = self
                .tracker
                .pricing()
                .for_model(&model)
                .map(|p| p.blended_per_1k())
                .unwrap_or(0.0);
            selection = SelectionResult {
                reason: format!(
                    "{} (signals favor {} at {:.0}% confidence)",
                    selection.reason,
                    decision.tier,
                    decision.confidence * 100.0
                ),
                tier: decision.tier,
                blended_cost_per_1k,
                model,
                overridden: false,
            };
        }

        // Primary attempt plus the fallback chain.
        let chain = self.fallback_chain(&selection);
        let mut attempts = 0usize;
        let mut last_err: Option<ProviderError> = None;

        for candidate in std::iter::once(&selection).chain(chain.iter()) {
            attempts += 1;
            let attempt_started = Instant::now();
            let chat = self.build_chat_request(request, &candidate.model);

            match self.provider.complete(&chat).await {
                Ok(response) => {
                    let response = match &self.agent {
                        Some(agent) => agent.post_process(response),
                        None => response,
                    };
                    let attempt_latency = attempt_started.elapsed().as_millis() as u64;
                    self.tracker.record_usage(
                        self.provider.name(),
                        &candidate.model,
                        response.usage.input_tokens,
                        response.usage.output_tokens,
                        attempt_latency,
                    );

                    let fallbacks_attempted = attempts - 1;
                    let latency_ms = started.elapsed().as_millis() as u64;
                    self.record_outcome_internal(
                        candidate,
                        predicted_tier,
                        request,
                        &combined,
                        true,
                        latency_ms,
                        fallbacks_attempted,
                        context_influenced,
                    );

                    info!(
                        model = %candidate.model,
                        tier = %candidate.tier,
                        fallbacks = fallbacks_attempted,
                        latency_ms,
                        "request routed"
                    );
                    return Ok(SmartRoutingResult {
                        response,
                        decision: Some(RoutingMetadata {
                            model: candidate.model.clone(),
                            tier: candidate.tier,
                            reason: candidate.reason.clone(),
                            complexity_score: combined.score,
                            complexity_level: combined.level,
                            estimated_input_tokens,
                            fallbacks_attempted,
                            latency_ms,
                            context_influenced,
                            context_snippets,
                            context_hints,
                            context_suggested_tier,
                            context_hint_confidence,
                        }),
                    });
                }
                Err(err) => {
                    if !is_retryable(&err) {
                        warn!(model = %candidate.model, %err, "non-retryable provider error");
                        return Err(err);
                    }

                    self.tracker.record_error(self.provider.name(), &candidate.model);
                    let error_count = self
                        .tracker
                        .usage_for_model(&candidate.model)
                        .map(|u| u.error_count as u32)
                        .unwrap_or(1);
                    let delay = self.backoff.delay_for(&err, error_count);
                    warn!(
                        model = %candidate.model,
                        %err,
                        delay_ms = delay.as_millis() as u64,
                        "retryable provider error, backing off before fallback"
                    );
                    tokio::time::sleep(delay).await;
                    last_err = Some(err);
                }
            }
        }

        self.record_outcome_internal(
            &selection,
            predicted_tier,
            request,
            &combined,
            false,
            started.elapsed().as_millis() as u64,
            attempts.saturating_sub(1),
            context_influenced,
        );
        Err(ProviderError::AllModelsExhausted {
            attempts,
            last: Box::new(last_err.unwrap_or(ProviderError::Timeout)),
        })
    }

    /// Close the learning loop for work completed outside the router
    /// (e.g. an external tool-execution engine finishing a chain).
    #[allow(clippy::too_many_arguments)]
    pub fn record_outcome(
        &self,
        selection: &SelectionResult,
        predicted_tier: ModelTier,
        request: &RouteRequest,
        complexity: &ComplexityScore,
        success: bool,
        latency_ms: u64,
        fallbacks: usize,
        context_influenced: bool,
    ) {
        self.record_outcome_internal(
            selection,
            predicted_tier,
            request,
            complexity,
            success,
            latency_ms,
            fallbacks,
            context_influenced,
        );
    }

    // Plain path: no analysis, no fallback, no learning.
    async fn route_plain(&self, request: &RouteRequest) -> Result<SmartRoutingResult> {
        let model = request
            .requested_model
            .clone()
            .unwrap_or_else(|| self.config.aliases.sonnet.clone());
        let chat = self.build_chat_request(request, &model);
        let started = Instant::now();

        match self.provider.complete(&chat).await {
            Ok(response) => {
                let response = match &self.agent {
                    Some(agent) => agent.post_process(response),
                    None => response,
                };
                self.tracker.record_usage(
                    self.provider.name(),
                    &model,
                    response.usage.input_tokens,
                    response.usage.output_tokens,
                    started.elapsed().as_millis() as u64,
                );
                Ok(SmartRoutingResult {
                    response,
                    decision: None,
                })
            }
            Err(err) => {
                self.tracker.record_error(self.provider.name(), &model);
                Err(err)
            }
        }
    }

    /// The ordered fallback chain for a primary selection: cheaper
    /// alternatives first, the primary itself excluded. Chain shape is the
    /// router's concern; the selector only resolves tiers to models.
    fn fallback_chain(&self, primary: &SelectionResult) -> Vec<SelectionResult> {
        let tiers = match primary.tier {
            ModelTier::Opus => [ModelTier::Sonnet, ModelTier::Haiku],
            ModelTier::Haiku => [ModelTier::Sonnet, ModelTier::Opus],
            ModelTier::Sonnet => [ModelTier::Haiku, ModelTier::Opus],
        };
        tiers
            .into_iter()
            .map(|tier| {
                let model = self.selector.table().model_for_tier(tier).to_string();
                SelectionResult {
                    blended_cost_per_1k: self
                        .tracker
                        .pricing()
                        .for_model(&model)
                        .map(|p| p.blended_per_1k())
                        .unwrap_or(0.0),
                    model,
                    tier,
                    reason: format!("fallback from {}", primary.model),
                    overridden: false,
                }
            })
            .filter(|fb| fb.model != primary.model)
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn record_outcome_internal(
        &self,
        selection: &SelectionResult,
        predicted_tier: ModelTier,
        request: &RouteRequest,
        complexity: &ComplexityScore,
        success: bool,
        latency_ms: u64,
        fallbacks: usize,
        context_influenced: bool,
    ) {
        if let Some(intelligence) = &self.intelligence {
            intelligence.record_outcome(
                selection,
                predicted_tier,
                &request.message,
                complexity.score,
                complexity.level,
                request.tools.len(),
                success,
                latency_ms,
                fallbacks,
                context_influenced,
            );
        }
    }

    /// `message/4 + recent session content/4 + 2000` -- a cheap stand-in
    /// for real tokenization, biased high by the constant.
    async fn estimate_input_tokens(&self, request: &RouteRequest) -> u64 {
        let mut estimate = request.message.len() as u64 / 4;
        if let Some(store) = &self.session {
            let recent = store
                .recent_messages(&request.session_key, self.config.recent_message_limit)
                .await;
            for (_, content) in recent {
                estimate += content.len() as u64 / 4;
            }
        }
        estimate + 2000
    }

    fn all_tools(&self, request: &RouteRequest) -> Vec<ToolDefinition> {
        let mut tools = request.tools.clone();
        if let Some(agent) = &self.agent {
            tools.extend(agent.tool_definitions());
        }
        tools
    }

    fn build_chat_request(&self, request: &RouteRequest, model: &str) -> ChatRequest {
        let mut messages = Vec::new();
        if let Some(agent) = &self.agent {
            let blocks = agent.system_prompt();
            if !blocks.is_empty() {
                let prompt = blocks
                    .iter()
                    .map(|b| b.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                messages.push(ChatMessage::system(prompt));
            }
        }
        messages.push(ChatMessage::user(request.message.clone()));

        ChatRequest {
            messages,
            model: Some(model.to_string()),
            tools: self.all_tools(request),
            max_tokens: request.max_tokens,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
