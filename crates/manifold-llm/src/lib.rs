//! LLM provider abstraction for manifold.
//!
//! This crate defines the narrow contract between the routing core and the
//! upstream model providers the embedding application supplies. It contains
//! no HTTP client -- protocol plumbing (transports, auth refresh, stream
//! parsing) lives with the caller; the routing core only needs:
//!
//! - [`Provider`] -- the one-method chat completion trait
//! - [`ChatRequest`] / [`ChatResponse`] -- the request/response value types
//! - [`ProviderError`] -- the error taxonomy the fallback loop classifies
//! - [`BackoffPolicy`] -- retry-delay computation for rate limits and
//!   transient failures
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use manifold_llm::{ChatMessage, ChatRequest, Provider};
//!
//! async fn ask(provider: &dyn Provider) -> manifold_llm::Result<String> {
//!     let request = ChatRequest::new(vec![ChatMessage::user("What is Rust?")]);
//!     let response = provider.complete(&request).await?;
//!     Ok(response.content)
//! }
//! ```

pub mod backoff;
pub mod error;
pub mod provider;
pub mod types;

pub use backoff::BackoffPolicy;
pub use error::{ProviderError, Result, is_rate_limited, is_retryable, retry_after};
pub use provider::Provider;
pub use types::{ChatMessage, ChatRequest, ChatResponse, ToolCall, ToolDefinition, Usage};
