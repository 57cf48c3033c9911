//! Routing core for the manifold AI gateway.
//!
//! For each incoming chat request this crate decides which upstream model
//! to invoke, enforces cost and rate-limit constraints, falls back to
//! alternatives on failure, learns from historical outcomes, and can defer
//! over-capacity requests to a priority batch queue.
//!
//! # Architecture
//!
//! - [`complexity`] scores requests 0-100 from message text, tool
//!   availability, and in-flight tool chains
//! - [`selector`] maps a score plus live budget/error signals to a concrete
//!   model id across the haiku/sonnet/opus tier hierarchy
//! - [`usage`] is the shared telemetry singleton every other component reads
//! - [`optimizer`], [`patterns`], and [`predictor`] turn history into
//!   downgrade advice, cluster recommendations, and budget forecasts
//! - [`intelligence`] merges those signals and auto-tunes itself against
//!   observed outcomes
//! - [`orchestrator`] is the per-request entry point with the fallback chain
//! - [`batch`] holds the priority queue and its background processor
//!
//! The crate talks to the outside world only through the narrow contracts
//! in [`external`], [`context`], and `manifold_llm::Provider` -- callers
//! supply the implementations.

pub mod batch;
pub mod complexity;
pub mod context;
pub mod external;
pub mod intelligence;
pub mod optimizer;
pub mod orchestrator;
pub mod patterns;
pub mod predictor;
pub mod selector;
pub mod usage;

pub use batch::{
    BatchPriority, BatchProcessor, BatchQueue, BatchRequest, BatchStatus, QueueError,
};
pub use complexity::{ComplexityAnalyzer, ComplexityScore};
pub use context::{ContextEngine, ContextHint, RetrievedContext, SearchHit};
pub use intelligence::{RouterIntelligence, RoutingDecision, RoutingOutcome};
pub use optimizer::{CostOptimizer, CostRecord, OptimizationPolicy, OptimizationSuggestion};
pub use orchestrator::{RouteRequest, SmartRouter, SmartRoutingResult};
pub use patterns::{PatternAnalyzer, PatternCluster, RequestPattern};
pub use predictor::{BudgetForecast, UsagePredictor, UsageTrend};
pub use selector::{ModelSelector, SelectionResult};
pub use usage::{ModelUsage, UsageSnapshot, UsageTracker};
