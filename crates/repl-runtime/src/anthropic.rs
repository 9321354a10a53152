//! Anthropic Messages Provider
//!
//! The system prompt travels outside the message list, tool calls are
//! `tool_use` content blocks, and tool results go back as `tool_result`
//! blocks inside a user turn.

use async_trait::async_trait;
use repl_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{Completion, FinishReason, GenerationOptions, LlmProvider, ModelInfo, TokenUsage},
    tool::{ToolCall, ToolSchema},
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::http::{self, EnvCredential};

const API_VERSION: &str = "2023-06-01";

/// Anthropic endpoint configuration
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    pub base_url: String,
    pub api_key_var: String,
    pub default_model: String,
    pub timeout_secs: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".into(),
            api_key_var: "ANTHROPIC_API_KEY".into(),
            default_model: "claude-sonnet-4-5".into(),
            timeout_secs: 120,
        }
    }
}

/// Anthropic provider
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
    credential: EnvCredential,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self::from_config(AnthropicConfig::default())
    }

    pub fn from_config(config: AnthropicConfig) -> Self {
        Self {
            client: http::build_client(config.timeout_secs),
            credential: EnvCredential::new(config.api_key_var.clone()),
            config,
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let key = self
            .credential
            .value()
            .ok_or_else(|| AgentError::Auth(format!("{} is not set", self.credential.var())))?;
        Ok(builder
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Split out the system prompt and fold the rest into alternating turns
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<WireMessage>) {
        let mut system: Vec<&str> = Vec::new();
        let mut turns: Vec<WireMessage> = Vec::new();

        for message in messages {
            let (role, blocks) = match message.role {
                Role::System => {
                    system.push(message.text());
                    continue;
                }
                Role::User => ("user", text_block(message.text())),
                Role::Assistant => {
                    let mut blocks = text_block(message.text());
                    blocks.extend(message.tool_calls.iter().map(|call| ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: object_input(&call.arguments),
                    }));
                    ("assistant", blocks)
                }
                Role::Tool => (
                    "user",
                    vec![ContentBlock::ToolResult {
                        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                        content: message.text().to_string(),
                        is_error: message.is_tool_failure(),
                    }],
                ),
            };

            if blocks.is_empty() {
                continue;
            }

            match turns.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => turns.push(WireMessage {
                    role: role.to_string(),
                    content: blocks,
                }),
            }
        }

        let system = (!system.is_empty()).then(|| system.join("\n\n"));
        (system, turns)
    }

    fn convert_tools(tools: &[ToolSchema]) -> Vec<WireTool<'_>> {
        tools
            .iter()
            .map(|t| WireTool {
                name: &t.name,
                description: &t.description,
                input_schema: &t.input_schema,
            })
            .collect()
    }

    fn convert_completion(response: MessagesResponse) -> Completion {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in response.content {
            match block {
                ResponseBlock::Text { text: t } => text.push_str(&t),
                ResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall::new(id, name, input)),
                ResponseBlock::Other => {}
            }
        }

        Completion {
            content: (!text.is_empty()).then_some(text),
            tool_calls,
            model: response.model,
            usage: Some(TokenUsage {
                prompt_tokens: response.usage.input_tokens,
                completion_tokens: response.usage.output_tokens,
                total_tokens: response.usage.input_tokens.saturating_add(response.usage.output_tokens),
            }),
            finish_reason: response.stop_reason.as_deref().map(stop_reason),
        }
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn text_block(text: &str) -> Vec<ContentBlock> {
    if text.trim().is_empty() {
        Vec::new()
    } else {
        vec![ContentBlock::Text { text: text.to_string() }]
    }
}

/// `tool_use.input` must be an object
fn object_input(arguments: &Value) -> Value {
    match arguments {
        Value::Object(_) => arguments.clone(),
        Value::Null => Value::Object(Map::new()),
        other => {
            let mut map = Map::new();
            map.insert("input".into(), other.clone());
            Value::Object(map)
        }
    }
}

fn stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolUse,
        _ => FinishReason::Error,
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    fn is_available(&self) -> bool {
        self.credential.is_present()
    }

    fn credential_vars(&self) -> Vec<String> {
        vec![self.config.api_key_var.clone()]
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Anthropic health check failed: {}", e);
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
        let (system, messages) = Self::convert_messages(messages);
        let body = MessagesRequest {
            model: &options.model,
            max_tokens: options.max_tokens,
            system,
            messages,
            tools: Self::convert_tools(tools),
            temperature: options.temperature,
            top_p: options.top_p,
            stop_sequences: &options.stop_sequences,
        };

        let response = self
            .request(self.client.post(self.url("messages")))?
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_error("anthropic", &e))?;

        let response: MessagesResponse = http::read_json("anthropic", response).await?;
        Ok(Self::convert_completion(response))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .request(self.client.get(self.url("models")))?
            .send()
            .await
            .map_err(|e| http::transport_error("anthropic", &e))?;

        let list: ModelList = http::read_json("anthropic", response).await?;
        Ok(list
            .data
            .into_iter()
            .map(|m| ModelInfo {
                name: m.display_name.unwrap_or_else(|| m.id.clone()),
                id: m.id,
                context_length: Some(200_000),
            })
            .collect())
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop_sequences: &'a [String],
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
}
