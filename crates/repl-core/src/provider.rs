//! LLM Provider Strategy Pattern
//!
//! Defines a common interface for all LLM providers (OpenAI, Anthropic, Groq,
//! Ollama, ...). Each adapter translates the normalized [`Message`] /
//! [`ToolCall`] shapes to its vendor's wire format, so the loop never sees
//! provider quirks.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use repl_core::provider::{GenerationOptions, LlmProvider};
//!
//! let completion = provider.complete(&messages, &tools, &options).await?;
//! if completion.tool_calls.is_empty() {
//!     println!("{}", completion.text());
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;
use crate::tool::{ToolCall, ToolSchema};

/// Configuration for LLM generation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model identifier (e.g., "gpt-4o", "claude-sonnet-4-5")
    #[serde(default)]
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Top-p nucleus sampling
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

const fn default_temperature() -> f32 { 0.7 }
const fn default_max_tokens() -> u32 { 4096 }
const fn default_top_p() -> f32 { 0.9 }

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            stop_sequences: Vec::new(),
        }
    }
}

impl GenerationOptions {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// Response from an LLM completion
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text, if any
    pub content: Option<String>,

    /// Tool calls requested by the model, in emitted order
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Model that generated this response
    pub model: String,

    /// Token usage statistics (if available)
    pub usage: Option<TokenUsage>,

    /// Finish reason
    pub finish_reason: Option<FinishReason>,
}

impl Completion {
    /// Plain text answer
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        }
    }

    /// Tool-call request without text
    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            finish_reason: Some(FinishReason::ToolUse),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Text content, empty when absent
    pub fn text_or_empty(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage statistics
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
}

/// Information about a model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub context_length: Option<u32>,
}

/// Strategy trait for LLM providers
///
/// Implement this trait to add support for new LLM backends.
/// The agent works exclusively through this interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable provider name used for switching (e.g., "openai")
    fn name(&self) -> &str;

    /// Model used until the user picks another one
    fn default_model(&self) -> &str;

    /// Whether credentials for this provider are present right now.
    /// Checked on every query, never cached.
    fn is_available(&self) -> bool;

    /// Environment variables that make this provider available
    fn credential_vars(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether the vendor API takes tool schemas natively. When false the loop
    /// describes tools in the system prompt and parses fenced tool blocks.
    fn supports_native_tools(&self) -> bool {
        true
    }

    /// Check if the provider is reachable and configured correctly
    async fn health_check(&self) -> Result<bool>;

    /// Generate a completion from the transcript, offering `tools`
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion>;

    /// List available models
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Estimate token count for text (provider-specific tokenization)
    fn estimate_tokens(&self, text: &str) -> u32 {
        // Default: rough estimate of ~4 chars per token
        u32::try_from(text.len() / 4).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_options_defaults() {
        let opts = GenerationOptions::default();
        assert!((opts.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(opts.max_tokens, 4096);
        assert!(opts.model.is_empty());
        assert_eq!(GenerationOptions::for_model("gpt-4o").model, "gpt-4o");
    }

    #[test]
    fn test_completion_helpers() {
        let done = Completion::text("Paris").with_model("m");
        assert!(!done.wants_tools());
        assert_eq!(done.text_or_empty(), "Paris");

        let call = ToolCall::new("1", "read_file", serde_json::json!({}));
        let calls = Completion::calls(vec![call]);
        assert!(calls.wants_tools());
        assert_eq!(calls.finish_reason, Some(FinishReason::ToolUse));
    }
}
