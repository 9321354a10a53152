//! # repl-runtime
//!
//! Provider adapters for the MCP REPL.
//!
//! ## Providers
//!
//! - **OpenAI**: Chat Completions with native function calling
//! - **Anthropic**: Messages API with `tool_use` blocks
//! - **Groq**: OpenAI-compatible endpoint
//! - **Ollama** (feature `ollama`): local inference, opt-in via `OLLAMA_HOST`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use repl_runtime::default_selector;
//!
//! let selector = Arc::new(default_selector());
//! let session = Session::start(selector, tools, ExecutorConfig::default())?;
//! ```

use std::sync::Arc;

use repl_core::BackendSelector;

pub mod anthropic;
pub mod http;
pub mod openai;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};
pub use openai::{OpenAiConfig, OpenAiProvider};

// Re-export core types for convenience
pub use repl_core::{AgentError, LlmProvider, Message, Result, Role, Session, Tool, ToolRegistry};

/// Selector with every built-in backend, in preference order. The first one
/// whose credentials are present becomes current.
pub fn default_selector() -> BackendSelector {
    let selector = BackendSelector::new()
        .with_provider(Arc::new(OpenAiProvider::openai()))
        .with_provider(Arc::new(AnthropicProvider::new()))
        .with_provider(Arc::new(OpenAiProvider::groq()));

    #[cfg(feature = "ollama")]
    let selector = selector.with_provider(Arc::new(OllamaProvider::from_env()));

    selector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_selector_registers_builtins() {
        let names: Vec<String> = default_selector().list_providers().into_keys().collect();
        assert!(names.contains(&"openai".to_string()));
        assert!(names.contains(&"anthropic".to_string()));
        assert!(names.contains(&"groq".to_string()));
        #[cfg(feature = "ollama")]
        assert!(names.contains(&"ollama".to_string()));
    }
}
