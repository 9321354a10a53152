//! Session Management
//!
//! A session owns one conversation and drives it through a [`ToolExecutor`]
//! that references the shared backend selector and tool source. Nothing here
//! is process-global; a host may run any number of independent sessions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::backend::{BackendDescriptor, BackendSelector};
use crate::error::Result;
use crate::executor::{ExecutorConfig, FinalAnswer, SharedConversation, ToolExecutor};
use crate::message::{Conversation, Message};
use crate::tool::{ToolCall, ToolResult, ToolSource};

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for banners and log lines
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An interactive session
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    conversation: SharedConversation,
    executor: ToolExecutor,
}

impl Session {
    /// Start a session. Refuses to start when no backend has credentials.
    pub fn start(
        selector: Arc<BackendSelector>,
        tools: Arc<dyn ToolSource>,
        config: ExecutorConfig,
    ) -> Result<Self> {
        let conversation = Conversation::new().with_max_context_tokens(config.max_context_tokens);
        Self::resume(selector, tools, config, conversation)
    }

    /// Start a session on an existing conversation (e.g. one restored by the host)
    pub fn resume(
        selector: Arc<BackendSelector>,
        tools: Arc<dyn ToolSource>,
        config: ExecutorConfig,
        conversation: Conversation,
    ) -> Result<Self> {
        let backend = selector.ensure_ready()?;
        let id = SessionId::new();
        tracing::info!(session = %id.short(), backend = %backend.name, model = %backend.model, "Session started");

        Ok(Self {
            id,
            created_at: Utc::now(),
            conversation: Arc::new(Mutex::new(conversation)),
            executor: ToolExecutor::new(selector, tools, config),
        })
    }

    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Send one user message through the tool-calling loop
    pub async fn execute(&self, text: &str) -> Result<FinalAnswer> {
        let answer = self.executor.execute(text, &self.conversation).await?;
        tracing::info!(
            session = %self.id.short(),
            rounds = answer.rounds,
            tool_calls = answer.tool_calls,
            complete = answer.is_complete(),
            "Turn finished"
        );
        Ok(answer)
    }

    /// Switch the active backend; history is kept
    pub fn switch_backend(&self, name: &str) -> Result<BackendDescriptor> {
        self.executor.selector().switch(name)
    }

    /// Select a model for the active backend
    pub fn set_model(&self, model: &str) -> Result<()> {
        self.executor.selector().set_model(model)
    }

    pub fn backends(&self) -> Vec<BackendDescriptor> {
        self.executor.selector().descriptors()
    }

    pub fn current_backend(&self) -> Option<BackendDescriptor> {
        self.backends().into_iter().find(|b| b.current)
    }

    /// Names of the tools the model can call right now
    pub fn tool_names(&self) -> Vec<String> {
        self.executor.tools().schemas().into_iter().map(|s| s.name).collect()
    }

    /// Call a tool directly, bypassing the model. The conversation is untouched.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult {
        let call = ToolCall::new(format!("manual_{}", Uuid::new_v4().simple()), name, arguments);
        tracing::info!(session = %self.id.short(), tool = name, "Manual tool call");
        self.executor.invoke(call).await
    }

    /// Copy of the transcript
    pub async fn transcript(&self) -> Vec<Message> {
        self.conversation.lock().await.messages().to_vec()
    }

    /// Copy of the whole conversation, for hosts that persist it
    pub async fn snapshot(&self) -> Conversation {
        self.conversation.lock().await.clone()
    }

    /// Drop everything but the system prompt
    pub async fn reset(&self) {
        self.conversation.lock().await.clear_history();
        tracing::info!(session = %self.id.short(), "Conversation reset");
    }

    /// Shared handle to the conversation
    pub fn conversation(&self) -> SharedConversation {
        Arc::clone(&self.conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::message::Role;
    use crate::testing::{EchoTool, FailingTool, ScriptedProvider, call};
    use crate::tool::ToolFailureKind;
    use crate::tool::ToolRegistry;
    use serde_json::json;

    fn tools() -> Arc<ToolRegistry> {
        let tools = Arc::new(ToolRegistry::new());
        tools.register(EchoTool);
        tools
    }

    #[test]
    fn test_session_id() {
        let id = SessionId::new();
        assert_eq!(id.short().len(), 8);
        assert_eq!(SessionId::from_string("abc").short(), "abc");
    }

    #[test]
    fn test_refuses_to_start_without_provider() {
        let selector = Arc::new(
            BackendSelector::new().with_provider(Arc::new(ScriptedProvider::new("openai").unavailable())),
        );
        let result = Session::start(selector, tools(), ExecutorConfig::default());
        assert!(matches!(result, Err(AgentError::NoProviderAvailable(_))));
    }

    #[tokio::test]
    async fn test_switch_keeps_history() {
        let first = Arc::new(ScriptedProvider::new("first").text("one"));
        let second = Arc::new(
            ScriptedProvider::new("second")
                .calls(vec![call("c", "echo", json!({"text": "two"}))])
                .text("two"),
        );
        let selector = Arc::new(
            BackendSelector::new()
                .with_provider(first.clone())
                .with_provider(second.clone()),
        );
        let session = Session::start(selector, tools(), ExecutorConfig::default()).unwrap();
        assert_eq!(session.current_backend().unwrap().name, "first");

        session.execute("first question").await.unwrap();
        let before = session.transcript().await;

        session.switch_backend("second").unwrap();
        session.set_model("bigger-model").unwrap();
        let answer = session.execute("second question").await.unwrap();
        assert_eq!(answer.model, "bigger-model");

        let after = session.transcript().await;
        for (old, new) in before.iter().zip(&after) {
            assert_eq!(old.content, new.content);
        }
        assert_eq!(second.seen()[0].model, "bigger-model");
        assert_eq!(after.iter().filter(|m| m.role == Role::Tool).count(), 1);
    }

    #[tokio::test]
    async fn test_reset_keeps_system_prompt() {
        let selector = Arc::new(BackendSelector::new().with_provider(Arc::new(ScriptedProvider::new("p").text("hi"))));
        let session = Session::start(selector, tools(), ExecutorConfig::default()).unwrap();
        session.execute("hello").await.unwrap();
        assert_eq!(session.transcript().await.len(), 3);

        session.reset().await;
        let transcript = session.transcript().await;
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, Role::System);
        assert_eq!(session.tool_names(), vec!["echo"]);
    }

    #[tokio::test]
    async fn test_manual_tool_call_leaves_transcript_alone() {
        let provider = Arc::new(ScriptedProvider::new("p").text("hi"));
        let selector = Arc::new(BackendSelector::new().with_provider(provider.clone()));
        let registry = tools();
        registry.register(FailingTool);
        let session = Session::start(selector, registry, ExecutorConfig::default()).unwrap();
        let before = session.transcript().await;

        let ok = session.call_tool("echo", json!({"text": "ping"})).await;
        assert!(ok.is_success());
        assert!(ok.render().contains("ping"));

        let failed = session.call_tool("explode", json!({})).await;
        assert_eq!(failed.failure_kind(), Some(ToolFailureKind::Execution));
        assert!(failed.render().starts_with("Error: "));

        let missing = session.call_tool("nope", json!({})).await;
        assert_eq!(missing.failure_kind(), Some(ToolFailureKind::NotFound));

        assert_eq!(session.transcript().await.len(), before.len());
        assert!(provider.seen().is_empty());
    }
}
