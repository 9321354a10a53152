//! Ollama LLM Provider
//!
//! Local inference through Ollama's OpenAI-compatible `/v1` endpoint. The
//! native `ollama-rs` client handles health checks and model discovery.
//!
//! Many local models cannot take tool schemas. With `OLLAMA_NATIVE_TOOLS=false`
//! the loop lists tools in the system prompt instead, and this adapter
//! flattens earlier tool traffic into plain text turns.

use std::sync::Arc;

use async_trait::async_trait;
use ollama_rs::Ollama;
use repl_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{Completion, GenerationOptions, LlmProvider, ModelInfo},
    tool::ToolSchema,
};

use crate::openai::{OpenAiConfig, OpenAiProvider};

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    pub default_model: String,

    /// Whether the served models accept tool schemas
    pub native_tools: bool,

    /// Whether the backend is offered for selection
    pub enabled: bool,

    /// Connection timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            default_model: "llama3.2".into(),
            native_tools: true,
            enabled: true,
            timeout_secs: 300,
        }
    }
}

impl OllamaConfig {
    /// Read `OLLAMA_*` variables. The backend is only offered when
    /// `OLLAMA_HOST` is set, since there is no key to signal intent.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source. A port embedded in `OLLAMA_HOST` is
    /// used unless `OLLAMA_PORT` overrides it.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let host = get("OLLAMA_HOST").filter(|h| !h.trim().is_empty()).map(|h| split_host(&h));
        let embedded_port = host.as_ref().and_then(|(_, port)| *port);
        let port = get("OLLAMA_PORT")
            .and_then(|p| p.trim().parse().ok())
            .or(embedded_port)
            .unwrap_or(defaults.port);
        let native_tools = get("OLLAMA_NATIVE_TOOLS")
            .is_none_or(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"));

        Self {
            enabled: host.is_some(),
            host: host.map_or(defaults.host, |(host, _)| host),
            port,
            default_model: get("OLLAMA_MODEL").unwrap_or(defaults.default_model),
            native_tools,
            ..defaults
        }
    }

    fn base_url(&self) -> String {
        format!("{}:{}/v1", self.host.trim_end_matches('/'), self.port)
    }
}

/// Split `OLLAMA_HOST` into a scheme-qualified host and its port, if any.
/// The host is often given without a scheme, or with a trailing slash.
fn split_host(raw: &str) -> (String, Option<u16>) {
    let raw = raw.trim().trim_end_matches('/');
    let host = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    match host.rsplit_once(':') {
        Some((head, tail)) if head.contains("://") => match tail.parse::<u16>() {
            Ok(port) => (head.to_string(), Some(port)),
            Err(_) => (host, None),
        },
        _ => (host, None),
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
    chat: Arc<OpenAiProvider>,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create a new Ollama provider with custom host/port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::from_config(OllamaConfig {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    pub fn from_config(config: OllamaConfig) -> Self {
        let chat = OpenAiProvider::from_config(OpenAiConfig {
            name: "ollama".into(),
            base_url: config.base_url(),
            api_key_var: None,
            default_model: config.default_model.clone(),
            timeout_secs: config.timeout_secs,
        });

        Self {
            client: Ollama::new(config.host.clone(), config.port),
            chat: Arc::new(chat),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::from_config(OllamaConfig::from_env())
    }

    pub fn localhost() -> Self {
        Self::from_config(OllamaConfig::default())
    }

    /// Rewrite tool traffic as plain turns for models without tool support
    fn flatten_tool_traffic(messages: &[Message]) -> Vec<Message> {
        messages
            .iter()
            .map(|m| match m.role {
                Role::Assistant if m.has_tool_calls() => {
                    let mut text = m.text().to_string();
                    for call in &m.tool_calls {
                        if !text.is_empty() {
                            text.push_str("\n\n");
                        }
                        let request = serde_json::json!({"tool": call.name, "arguments": call.arguments});
                        text.push_str(&format!("```tool\n{request}\n```"));
                    }
                    Message::assistant(text)
                }
                Role::Tool => {
                    let name = m.name.as_deref().unwrap_or("tool");
                    Message::user(format!("[{name} result]\n{}", m.text()))
                }
                _ => m.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    fn is_available(&self) -> bool {
        self.config.enabled
    }

    fn credential_vars(&self) -> Vec<String> {
        vec!["OLLAMA_HOST".into()]
    }

    fn supports_native_tools(&self) -> bool {
        self.config.native_tools
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        if self.config.native_tools {
            self.chat.complete(messages, tools, options).await
        } else {
            let flattened = Self::flatten_tool_traffic(messages);
            self.chat.complete(&flattened, &[], options).await
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(format!("ollama: {e}")))?;

        Ok(models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
                context_length: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repl_core::tool::{ToolCall, ToolOutput, ToolResult};
    use serde_json::json;

    #[test]
    fn test_config_defaults() {
        let config = OllamaConfig::default();
        assert_eq!(config.host, "http://localhost");
        assert_eq!(config.port, 11434);
        assert_eq!(config.base_url(), "http://localhost:11434/v1");
        assert!(config.enabled);
    }

    fn config(vars: &[(&str, &str)]) -> OllamaConfig {
        OllamaConfig::from_lookup(|key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        })
    }

    #[test]
    fn test_split_host() {
        assert_eq!(split_host("127.0.0.1"), ("http://127.0.0.1".into(), None));
        assert_eq!(split_host("http://gpu-box:11434"), ("http://gpu-box".into(), Some(11434)));
        assert_eq!(split_host("https://ollama.internal/"), ("https://ollama.internal".into(), None));
        assert_eq!(split_host("gpu-box:8080/"), ("http://gpu-box".into(), Some(8080)));
        assert_eq!(split_host("http://[::1]"), ("http://[::1]".into(), None));
    }

    #[test]
    fn test_host_port_from_lookup() {
        let disabled = config(&[]);
        assert!(!disabled.enabled);
        assert_eq!(disabled.base_url(), "http://localhost:11434/v1");

        let embedded = config(&[("OLLAMA_HOST", "gpu-box:8080")]);
        assert!(embedded.enabled);
        assert_eq!(embedded.base_url(), "http://gpu-box:8080/v1");

        let slash = config(&[("OLLAMA_HOST", "http://h:8080/")]);
        assert_eq!(slash.base_url(), "http://h:8080/v1");

        let no_port = config(&[("OLLAMA_HOST", "https://ollama.internal/")]);
        assert_eq!(no_port.base_url(), "https://ollama.internal:11434/v1");

        let overridden = config(&[("OLLAMA_HOST", "gpu-box:8080"), ("OLLAMA_PORT", "9000")]);
        assert_eq!(overridden.base_url(), "http://gpu-box:9000/v1");

        let tools_off = config(&[("OLLAMA_HOST", "h"), ("OLLAMA_NATIVE_TOOLS", "off")]);
        assert!(!tools_off.native_tools);
    }

    #[test]
    fn test_programmatic_provider_is_available() {
        let provider = OllamaProvider::localhost();
        assert!(provider.is_available());
        assert!(provider.supports_native_tools());
        assert_eq!(provider.default_model(), "llama3.2");
    }

    #[test]
    fn test_flatten_tool_traffic() {
        let call = ToolCall::new("call_1", "read_file", json!({"file_path": "a.txt"}));
        let messages = vec![
            Message::system("sys"),
            Message::user("read it"),
            Message::assistant_with_calls(None, vec![call.clone()]),
            Message::tool_result(&ToolResult::success(&call, ToolOutput::text("hello"))),
        ];

        let flattened = OllamaProvider::flatten_tool_traffic(&messages);
        assert_eq!(flattened.len(), 4);
        assert!(!flattened[2].has_tool_calls());
        assert!(flattened[2].text().starts_with("```tool"));
        assert_eq!(flattened[3].role, Role::User);
        assert!(flattened[3].text().contains("[read_file result]"));
        assert!(flattened[3].text().contains("hello"));
    }
}
