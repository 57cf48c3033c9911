//! External collaborator contracts.
//!
//! The routing core consumes these interfaces; the embedding application
//! supplies the implementations. Every one of them is optional at the
//! orchestrator -- a missing collaborator degrades the feature it powers
//! rather than failing requests.

use std::sync::Arc;

use async_trait::async_trait;

use manifold_llm::{ChatResponse, ToolDefinition};

/// Read access to stored conversation history.
///
/// Used only to size the input-token estimate; an empty return is not an
/// error.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Up to `limit` most recent messages for a session, as
    /// `(role, content)` pairs, oldest first.
    async fn recent_messages(&self, session_key: &str, limit: usize) -> Vec<(String, String)>;
}

/// One block of a system prompt assembled by the agent system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBlock {
    /// Block kind (e.g. "identity", "instructions", "memory").
    pub kind: String,
    /// Block content.
    pub content: String,
}

/// The agent personality the router speaks for, when one is attached.
///
/// The router tolerates running without an agent system: no system prompt
/// is prepended, no extra tools are offered, and responses pass through
/// unchanged.
pub trait AgentSystem: Send + Sync {
    /// The system prompt to prepend, as typed blocks.
    fn system_prompt(&self) -> Vec<PromptBlock>;

    /// Tool definitions the agent contributes.
    fn tool_definitions(&self) -> Vec<ToolDefinition>;

    /// Post-process a provider response (rewrite content, drop tool calls,
    /// mark silent). The default passes it through.
    fn post_process(&self, response: ChatResponse) -> ChatResponse {
        response
    }
}

/// Predicate consulted by the batch processor before dequeuing work:
/// `true` when the provider currently has capacity.
pub type CapacityChecker = Arc<dyn Fn() -> bool + Send + Sync>;

// ── Tests ──────────────────────────────────────────────────────────────
