//! Test doubles: a scripted provider and a few tools with known behavior.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{Completion, GenerationOptions, LlmProvider, ModelInfo};
use crate::tool::{ParameterSchema, Tool, ToolCall, ToolOutput, ToolSchema};

enum Step {
    Reply(Completion),
    Fail(String),
    Hang,
}

/// One inference call as the provider saw it
#[derive(Clone, Debug)]
pub struct Seen {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
    pub model: String,
}

/// Provider that answers from a script and records what it was sent
pub struct ScriptedProvider {
    name: String,
    available: AtomicBool,
    native_tools: bool,
    script: Mutex<VecDeque<Step>>,
    /// Answer used once the script runs out
    repeat: Mutex<Option<Completion>>,
    seen: Mutex<Vec<Seen>>,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            available: AtomicBool::new(true),
            native_tools: true,
            script: Mutex::new(VecDeque::new()),
            repeat: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    pub fn without_native_tools(mut self) -> Self {
        self.native_tools = false;
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn text(self, content: &str) -> Self {
        self.script.lock().push_back(Step::Reply(Completion::text(content)));
        self
    }

    pub fn calls(self, calls: Vec<ToolCall>) -> Self {
        self.script.lock().push_back(Step::Reply(Completion::calls(calls)));
        self
    }

    pub fn reply(self, completion: Completion) -> Self {
        self.script.lock().push_back(Step::Reply(completion));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.script.lock().push_back(Step::Fail(message.to_string()));
        self
    }

    pub fn hang(self) -> Self {
        self.script.lock().push_back(Step::Hang);
        self
    }

    pub fn always(self, completion: Completion) -> Self {
        *self.repeat.lock() = Some(completion);
        self
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    pub fn rounds(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn credential_vars(&self) -> Vec<String> {
        vec![format!("SCRIPTED_{}_KEY", self.name.to_uppercase())]
    }

    fn supports_native_tools(&self) -> bool {
        self.native_tools
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.is_available())
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        self.seen.lock().push(Seen {
            messages: messages.to_vec(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
            model: options.model.clone(),
        });

        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Reply(completion)) => Ok(completion.with_model(options.model.clone())),
            Some(Step::Fail(message)) => Err(AgentError::Provider(message)),
            Some(Step::Hang) => std::future::pending().await,
            None => self
                .repeat
                .lock()
                .clone()
                .ok_or_else(|| AgentError::Provider("script exhausted".into())),
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "scripted-model".into(),
            name: "scripted-model".into(),
            context_length: None,
        }])
    }
}

pub fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall::new(id, name, arguments)
}

/// Returns its `text` argument
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "echo",
            "Echo the text back",
            vec![ParameterSchema::required("text", "string", "Text to echo")],
        )
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput> {
        Ok(ToolOutput::text(call.require_str("text")?))
    }
}

/// Always raises an execution error
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("explode", "Fails every time", Vec::new())
    }

    async fn execute(&self, _call: &ToolCall) -> Result<ToolOutput> {
        Err(AgentError::ToolExecution("disk on fire".into()))
    }
}

/// Sleeps, then logs its label so tests can see completion order
pub struct SlowTool {
    pub name: &'static str,
    pub delay: Duration,
    pub log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Tool for SlowTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::with_input_schema(self.name, "Sleeps before answering", json!({"type": "object"}))
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput> {
        tokio::time::sleep(self.delay).await;
        self.log.lock().push(format!("{}:{}", self.name, call.id));
        Ok(ToolOutput::text(format!("{} finished", self.name)))
    }
}

/// Validator blows up before the tool can run
pub struct PanickyValidatorTool;

#[async_trait]
impl Tool for PanickyValidatorTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("picky", "Rejects everything, loudly", Vec::new())
    }

    fn validate(&self, _call: &ToolCall) -> Result<()> {
        panic!("validator bug");
    }

    async fn execute(&self, _call: &ToolCall) -> Result<ToolOutput> {
        Ok(ToolOutput::text("unreachable"))
    }
}
