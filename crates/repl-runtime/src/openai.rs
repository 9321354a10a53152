//! OpenAI-compatible Provider
//!
//! Chat Completions with native function calling. Serves OpenAI itself, Groq,
//! and any other endpoint speaking the same dialect (Ollama's `/v1` included).

use async_trait::async_trait;
use repl_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    parse,
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider, ModelInfo, TokenUsage},
    tool::{ToolCall, ToolSchema},
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::{self, EnvCredential};

/// Endpoint configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// Backend name used for switching
    pub name: String,

    /// Base URL up to and including the version segment
    pub base_url: String,

    /// Variable holding the API key; `None` for keyless local endpoints
    pub api_key_var: Option<String>,

    pub default_model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl OpenAiConfig {
    /// api.openai.com, or `OPENAI_BASE_URL` when set
    pub fn openai() -> Self {
        Self {
            name: "openai".into(),
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key_var: Some("OPENAI_API_KEY".into()),
            default_model: "gpt-4o".into(),
            timeout_secs: 120,
        }
    }

    pub fn groq() -> Self {
        Self {
            name: "groq".into(),
            base_url: "https://api.groq.com/openai/v1".into(),
            api_key_var: Some("GROQ_API_KEY".into()),
            default_model: "llama-3.3-70b-versatile".into(),
            timeout_secs: 120,
        }
    }
}

/// OpenAI-compatible chat provider
pub struct OpenAiProvider {
    client: Client,
    config: OpenAiConfig,
    credential: Option<EnvCredential>,
}

impl OpenAiProvider {
    pub fn from_config(config: OpenAiConfig) -> Self {
        Self {
            client: http::build_client(config.timeout_secs),
            credential: config.api_key_var.clone().map(EnvCredential::new),
            config,
        }
    }

    pub fn openai() -> Self {
        Self::from_config(OpenAiConfig::openai())
    }

    pub fn groq() -> Self {
        Self::from_config(OpenAiConfig::groq())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        match &self.credential {
            None => Ok(builder),
            Some(cred) => {
                let key = cred
                    .value()
                    .ok_or_else(|| AgentError::Auth(format!("{} is not set", cred.var())))?;
                Ok(builder.bearer_auth(key))
            }
        }
    }

    /// Convert transcript to the chat-completions message list
    fn convert_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| match m.role {
                Role::System | Role::User => WireMessage {
                    role: m.role.to_string(),
                    content: Some(m.text().to_string()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                Role::Assistant => WireMessage {
                    role: "assistant".into(),
                    content: m.content.clone(),
                    tool_calls: m.has_tool_calls().then(|| m.tool_calls.iter().map(WireToolCall::from).collect()),
                    tool_call_id: None,
                },
                Role::Tool => WireMessage {
                    role: "tool".into(),
                    content: Some(m.text().to_string()),
                    tool_calls: None,
                    tool_call_id: m.tool_call_id.clone(),
                },
            })
            .collect()
    }

    fn convert_tools(tools: &[ToolSchema]) -> Vec<WireTool<'_>> {
        tools
            .iter()
            .map(|t| WireTool {
                kind: "function",
                function: WireFunctionDef {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.input_schema,
                },
            })
            .collect()
    }

    /// Convert the response to a normalized completion
    fn convert_completion(&self, response: ChatResponse, requested_model: &str) -> Result<Completion> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Provider(format!("{}: response has no choices", self.config.name)))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ToolCall::new(c.id, c.function.name, parse::parse_arguments(&c.function.arguments)))
            .collect();

        Ok(Completion {
            content: choice.message.content,
            tool_calls,
            model: response.model.unwrap_or_else(|| requested_model.to_string()),
            usage: response.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason: choice.finish_reason.as_deref().map(finish_reason),
        })
    }
}

fn finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolUse,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Error,
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    fn is_available(&self) -> bool {
        self.credential.as_ref().is_none_or(EnvCredential::is_present)
    }

    fn credential_vars(&self) -> Vec<String> {
        self.config.api_key_var.iter().cloned().collect()
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("{} health check failed: {}", self.config.name, e);
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
        let body = ChatRequest {
            model: &options.model,
            messages: Self::convert_messages(messages),
            tools: Self::convert_tools(tools),
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
            stop: &options.stop_sequences,
        };

        let response = self
            .request(self.client.post(self.url("chat/completions")))?
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_error(&self.config.name, &e))?;

        let response: ChatResponse = http::read_json(&self.config.name, response).await?;
        self.convert_completion(response, &options.model)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .request(self.client.get(self.url("models")))?
            .send()
            .await
            .map_err(|e| http::transport_error(&self.config.name, &e))?;

        let list: ModelList = http::read_json(&self.config.name, response).await?;
        Ok(list
            .data
            .into_iter()
            .map(|m| ModelInfo {
                name: m.id.clone(),
                id: m.id,
                context_length: None,
            })
            .collect())
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

fn function_kind() -> String {
    "function".into()
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            kind: function_kind(),
            function: WireFunction {
                name: call.name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef<'a>,
}

#[derive(Serialize)]
struct WireFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use repl_core::tool::{ParameterSchema, ToolFailureKind, ToolResult};
    use serde_json::json;

    #[test]
    fn test_config_defaults() {
        let groq = OpenAiConfig::groq();
        assert_eq!(groq.name, "groq");
        assert_eq!(groq.api_key_var.as_deref(), Some("GROQ_API_KEY"));
        assert!(groq.base_url.ends_with("/openai/v1"));
    }

    #[test]
    fn test_message_conversion() {
        let call = ToolCall::new("call_1", "read_file", json!({"file_path": "README.md"}));
        let messages = vec![
            Message::system("You are helpful."),
            Message::user("Read the readme"),
            Message::assistant_with_calls(None, vec![call.clone()]),
            Message::tool_result(&ToolResult::failure(&call, ToolFailureKind::Execution, "missing")),
        ];

        let converted = OpenAiProvider::convert_messages(&messages);
        assert_eq!(converted.len(), 4);

        let wire = serde_json::to_value(&converted).unwrap();
        assert_eq!(wire[2]["role"], "assistant");
        assert_eq!(wire[2]["tool_calls"][0]["type"], "function");
        assert_eq!(wire[2]["tool_calls"][0]["function"]["arguments"], r#"{"file_path":"README.md"}"#);
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
        assert!(wire[0].get("tool_calls").is_none());
    }

    #[test]
    fn test_tool_schema_forwarded_verbatim() {
        let schema = ToolSchema::new(
            "list_directory",
            "List a directory",
            vec![ParameterSchema::required("path", "string", "Directory")],
        );
        let wire = serde_json::to_value(OpenAiProvider::convert_tools(std::slice::from_ref(&schema))).unwrap();
        assert_eq!(wire[0]["function"]["parameters"], schema.input_schema);
    }

    #[test]
    fn test_completion_with_tool_calls() {
        let provider = OpenAiProvider::groq();
        let response: ChatResponse = serde_json::from_value(json!({
            "model": "llama-3.3-70b-versatile",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "a", "type": "function", "function": {"name": "run_command", "arguments": "{\"command\": \"echo hi\"}"}},
                        {"id": "b", "type": "function", "function": {"name": "read_file", "arguments": "{broken"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }))
        .unwrap();

        let completion = provider.convert_completion(response, "requested").unwrap();
        assert!(completion.content.is_none());
        assert_eq!(completion.finish_reason, Some(FinishReason::ToolUse));
        assert_eq!(completion.tool_calls[0].arguments, json!({"command": "echo hi"}));
        // Unparseable arguments survive as a string for the loop to reject
        assert_eq!(completion.tool_calls[1].arguments, json!("{broken"));
        assert_eq!(completion.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_empty_choices_is_provider_error() {
        let provider = OpenAiProvider::openai();
        let response: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        let err = provider.convert_completion(response, "gpt-4o").unwrap_err();
        assert!(err.is_provider_error());
    }
}
