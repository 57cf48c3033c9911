//! The core [`Provider`] trait for LLM chat completions.
//!
//! The routing core never builds providers itself -- the embedding
//! application supplies one per upstream and the orchestrator drives them
//! through this single method.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse};

/// A provider that can execute chat completion requests.
///
/// Implementations handle the protocol details for a specific upstream API
/// (authentication, request formatting, response parsing). The routing core
/// treats them as opaque: it sets `request.model` to the id it selected and
/// classifies whatever [`ProviderError`](crate::error::ProviderError) comes
/// back.
///
/// # Example
///
/// ```rust,ignore
/// use manifold_llm::{ChatMessage, ChatRequest, Provider};
///
/// async fn call_llm(provider: &dyn Provider) -> manifold_llm::Result<String> {
///     let request = ChatRequest::new(vec![ChatMessage::user("What is 2+2?")])
///         .with_model("claude-haiku-4-5-20251001");
///     let response = provider.complete(&request).await?;
///     Ok(response.content)
/// }
/// ```
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider name (e.g. "anthropic", "openai").
    fn name(&self) -> &str;

    /// Execute a chat completion request and return the response.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`](crate::error::ProviderError) if the request
    /// fails due to network issues, authentication problems, rate limiting,
    /// or invalid responses.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;
}
