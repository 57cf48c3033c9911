//! Request and response types for chat completion calls.
//!
//! These are the value types the [`Provider`](crate::provider::Provider)
//! contract exchanges. They are deliberately provider-neutral: the caller's
//! transport layer translates them to whatever wire format its upstream
//! speaks.

use serde::{Deserialize, Serialize};

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// The role of the message author (e.g. "system", "user", "assistant").
    pub role: String,

    /// The content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Create a message with an arbitrary role.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique identifier for this tool call.
    pub id: String,

    /// The name of the tool to invoke.
    pub name: String,

    /// The arguments as a JSON object.
    pub arguments: serde_json::Value,
}

/// A tool made available to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// Tool name (e.g. "Read", "Bash").
    pub name: String,

    /// Human-readable description of what the tool does.
    pub description: String,

    /// JSON schema of the tool's parameters.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a definition with an empty parameter schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({}),
        }
    }
}

/// Token usage reported by the provider for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    /// Tokens in the prompt.
    #[serde(alias = "inputTokens")]
    pub input_tokens: u64,

    /// Tokens in the completion.
    #[serde(alias = "outputTokens")]
    pub output_tokens: u64,
}

impl Usage {
    /// Total tokens in both directions.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A chat completion request handed to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The conversation messages.
    pub messages: Vec<ChatMessage>,

    /// Model override. `None` lets the provider use its configured default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Tool definitions available to the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Create a minimal request from messages alone.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: None,
            tools: Vec::new(),
            max_tokens: None,
        }
    }

    /// Set the model override.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the available tools.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// A chat completion response from a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The assistant's text content.
    pub content: String,

    /// Tool calls the model requested, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Token usage for this completion.
    #[serde(default)]
    pub usage: Usage,
}

impl ChatResponse {
    /// Returns `true` when the model requested at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
