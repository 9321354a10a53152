//! Tool System
//!
//! Tools are named capabilities with a description and a JSON Schema for their
//! arguments. The loop only sees them through [`ToolSource`], which is queried
//! by name on every round so tools can come and go at runtime.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID, unique within a round
    #[serde(default)]
    pub id: String,

    /// Tool identifier
    #[serde(alias = "tool")]
    pub name: String,

    /// Arguments, expected to be a JSON object keyed by parameter name
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    Value::Object(Map::new())
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Arguments as a keyword map
    pub fn argument_map(&self) -> Result<&Map<String, Value>> {
        self.arguments.as_object().ok_or_else(|| {
            AgentError::ToolValidation(format!(
                "arguments must be a JSON object, got: {}",
                self.arguments
            ))
        })
    }

    /// String argument lookup
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }

    /// Required string argument
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.str_arg(key)
            .ok_or_else(|| AgentError::ToolValidation(format!("Missing required parameter: {key}")))
    }
}

/// What a tool hands back on completion
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Tool reports failure without raising
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn json(data: Value) -> Self {
        Self {
            content: String::new(),
            data: Some(data),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: None,
            is_error: true,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Why a tool call did not produce a result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    NotFound,
    InvalidArguments,
    Execution,
    Timeout,
    /// The round was cut short before this call reported back
    Interrupted,
}

impl fmt::Display for ToolFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotFound => "tool not found",
            Self::InvalidArguments => "invalid arguments",
            Self::Execution => "execution failed",
            Self::Timeout => "timed out",
            Self::Interrupted => "interrupted",
        };
        f.write_str(label)
    }
}

/// Outcome of a single tool call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success {
        output: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Failure {
        kind: ToolFailureKind,
        message: String,
    },
}

/// Result paired 1:1 with a [`ToolCall`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: ToolOutput) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Success {
                output: output.content,
                data: output.data,
            },
        }
    }

    /// Failure description carries the tool name, the arguments and the error
    pub fn failure(call: &ToolCall, kind: ToolFailureKind, error: impl fmt::Display) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: ToolOutcome::Failure {
                kind,
                message: format!(
                    "{kind}: tool '{}' called with arguments {}: {error}",
                    call.name, call.arguments
                ),
            },
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    pub const fn failure_kind(&self) -> Option<ToolFailureKind> {
        match &self.outcome {
            ToolOutcome::Failure { kind, .. } => Some(*kind),
            ToolOutcome::Success { .. } => None,
        }
    }

    /// Text placed in the `tool` message the model will read
    pub fn render(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { output, data } => match data {
                Some(data) if output.is_empty() => data.to_string(),
                Some(data) => format!("{output}\n{data}"),
                None => output.clone(),
            },
            ToolOutcome::Failure { message, .. } => format!("Error: {message}"),
        }
    }
}

/// Parameter definition used to build a tool's input schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, integer, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    pub fn required(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
            default: None,
            enum_values: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Tool definition forwarded verbatim to providers for function calling
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// JSON Schema of the arguments object
    pub input_schema: Value,
}

impl ToolSchema {
    /// Build a schema from parameter definitions
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Vec<ParameterSchema>) -> Self {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), Value::String(param.param_type));
            prop.insert("description".into(), Value::String(param.description));
            if let Some(default) = param.default {
                prop.insert("default".into(), default);
            }
            if let Some(values) = param.enum_values {
                prop.insert("enum".into(), Value::Array(values));
            }
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
            properties.insert(param.name, Value::Object(prop));
        }

        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    /// Use an externally supplied JSON Schema as-is
    pub fn with_input_schema(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    pub fn required_parameters(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    fn properties(&self) -> Option<&Map<String, Value>> {
        self.input_schema.get("properties").and_then(Value::as_object)
    }

    /// Check an arguments value against the required list and declared types.
    /// Unknown properties are let through.
    pub fn validate_arguments(&self, arguments: &Value) -> Result<()> {
        let args = arguments.as_object().ok_or_else(|| {
            AgentError::ToolValidation(format!("arguments must be a JSON object, got: {arguments}"))
        })?;

        for name in self.required_parameters() {
            if !args.contains_key(name) {
                return Err(AgentError::ToolValidation(format!(
                    "Missing required parameter: {name}"
                )));
            }
        }

        let Some(properties) = self.properties() else {
            return Ok(());
        };

        for (name, value) in args {
            let expected = properties
                .get(name)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str);
            if let Some(expected) = expected {
                if !json_type_matches(expected, value) {
                    return Err(AgentError::ToolValidation(format!(
                        "Parameter '{name}' should be of type {expected}, got {value}"
                    )));
                }
            }
        }

        Ok(())
    }
}

fn json_type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema for LLM function calling
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with given arguments
    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput>;

    /// Validate arguments before execution (optional)
    fn validate(&self, call: &ToolCall) -> Result<()> {
        self.schema().validate_arguments(&call.arguments)
    }
}

/// Lookup seam between the loop and whatever holds the tools
pub trait ToolSource: Send + Sync {
    /// Resolve a tool by name at dispatch time
    fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>>;

    /// Schemas of every tool currently available
    fn schemas(&self) -> Vec<ToolSchema>;
}

/// Registry for available tools. Registration takes `&self` so tools can be
/// added or removed while sessions hold the registry.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new tool, replacing any tool with the same name
    pub fn register<T: Tool + 'static>(&self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a shared tool
    pub fn register_arc(&self, tool: Arc<dyn Tool>) {
        let name = tool.schema().name;
        tracing::debug!(tool = %name, "Registered tool");
        self.tools.write().insert(name, tool);
    }

    /// Remove a tool; returns whether it was present
    pub fn unregister(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    /// Sorted tool names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

impl ToolSource for ToolRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.get(name)
    }

    fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.read().values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }
}

/// Generate a system prompt section describing tools, for providers that
/// have no native function calling
pub fn generate_prompt_section(schemas: &[ToolSchema]) -> String {
    let mut prompt = String::from("## Available Tools\n\n");
    prompt.push_str("You can use the following tools by responding with a JSON block:\n\n");
    prompt.push_str("```tool\n{\"tool\": \"tool_name\", \"arguments\": {\"arg\": \"value\"}}\n```\n\n");
    prompt.push_str("Use one block per call. Tool results arrive in the next message.\n\n");

    for schema in schemas {
        prompt.push_str(&format!("### {}\n", schema.name));
        prompt.push_str(&format!("{}\n", schema.description));

        let required = schema.required_parameters();
        if let Some(properties) = schema.properties().filter(|p| !p.is_empty()) {
            prompt.push_str("**Parameters:**\n");
            for (name, prop) in properties {
                let param_type = prop.get("type").and_then(Value::as_str).unwrap_or("any");
                let description = prop.get("description").and_then(Value::as_str).unwrap_or("");
                let marker = if required.contains(&name.as_str()) { " (required)" } else { "" };
                prompt.push_str(&format!("- `{name}` ({param_type}){marker}: {description}\n"));
            }
        }
        prompt.push('\n');
    }

    prompt
}
