//! Conversation Messages
//!
//! Standard message format used across the agent system, and the
//! [`Conversation`] transcript the loop appends to.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::{ToolCall, ToolFailureKind, ToolResult};

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content, absent for a pure tool-call request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool calls requested by an assistant message, in emitted order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Call answered by a tool message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool name for tool messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Optional metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

/// Additional message metadata
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Token count (if known)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u32>,

    /// Model that generated this (for assistant messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Set on tool messages that carry a failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_failure: Option<ToolFailureKind>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message requesting tool calls
    pub fn assistant_with_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.filter(|c| !c.trim().is_empty()),
            tool_calls,
            ..Self::new(Role::Assistant, String::new())
        }
    }

    /// Create a tool result message answering `result.call_id`
    pub fn tool_result(result: &ToolResult) -> Self {
        let mut msg = Self::new(Role::Tool, result.render());
        msg.tool_call_id = Some(result.call_id.clone());
        msg.name = Some(result.name.clone());
        if let Some(kind) = result.failure_kind() {
            msg.metadata = Some(MessageMetadata {
                tool_failure: Some(kind),
                ..Default::default()
            });
        }
        msg
    }

    /// Record the model that produced this message
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.metadata.get_or_insert_with(MessageMetadata::default).model = Some(model.into());
        self
    }

    /// Text content, empty when absent
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Whether this is a tool message reporting a failure
    pub fn is_tool_failure(&self) -> bool {
        self.metadata.as_ref().and_then(|m| m.tool_failure).is_some()
    }

    /// Estimate token count (rough approximation)
    pub fn estimate_tokens(&self) -> u32 {
        // ~4 characters per token is a rough estimate
        let calls: usize = self
            .tool_calls
            .iter()
            .map(|c| c.name.len() + c.arguments.to_string().len())
            .sum();
        u32::try_from((self.text().len() + calls) / 4).unwrap_or(u32::MAX).saturating_add(4) // +4 for role overhead
    }
}

/// A break in the assistant-call / tool-result pairing
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairingViolation {
    /// Tool message with no matching unanswered request
    OrphanedResult { index: usize, call_id: String },
    /// Second tool message for a call that was already answered
    DuplicateResult { index: usize, call_id: String },
    /// Request whose round closed without a result
    UnansweredCall { call_id: String, name: String },
}

fn default_max_context() -> u32 {
    32_768
}

/// Conversation history with utility methods
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,

    /// Maximum context length (in estimated tokens)
    #[serde(default = "default_max_context")]
    max_context_tokens: u32,
}

impl Default for Conversation {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            max_context_tokens: default_max_context(),
        }
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        let mut conv = Self::new();
        conv.push(Message::system(prompt));
        conv
    }

    pub const fn with_max_context_tokens(mut self, max: u32) -> Self {
        self.max_context_tokens = max;
        self
    }

    pub const fn set_max_context_tokens(&mut self, max: u32) {
        self.max_context_tokens = max;
    }

    pub const fn max_context_tokens(&self) -> u32 {
        self.max_context_tokens
    }

    /// Add a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn has_system_prompt(&self) -> bool {
        self.messages.first().is_some_and(|m| m.role == Role::System)
    }

    /// Insert a system prompt at the front unless one is present
    pub fn ensure_system_prompt(&mut self, prompt: &str) {
        if !self.has_system_prompt() {
            self.messages.insert(0, Message::system(prompt));
        }
    }

    /// Clear all messages except system prompt
    pub fn clear_history(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
    }

    /// Estimate total tokens in conversation
    pub fn estimate_tokens(&self) -> u32 {
        self.messages.iter().map(Message::estimate_tokens).fold(0, u32::saturating_add)
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Every tool message must answer exactly one still-open request from the
    /// assistant message that opened its round.
    pub fn pairing_violations(&self) -> Vec<PairingViolation> {
        let mut violations = Vec::new();
        let mut pending: Vec<&ToolCall> = Vec::new();
        let mut answered: HashSet<&str> = HashSet::new();

        for (index, message) in self.messages.iter().enumerate() {
            if message.role == Role::Tool {
                let call_id = message.tool_call_id.as_deref().unwrap_or_default();
                if let Some(pos) = pending.iter().position(|c| c.id == call_id) {
                    pending.remove(pos);
                    answered.insert(call_id);
                } else if answered.contains(call_id) {
                    violations.push(PairingViolation::DuplicateResult { index, call_id: call_id.into() });
                } else {
                    violations.push(PairingViolation::OrphanedResult { index, call_id: call_id.into() });
                }
                continue;
            }

            violations.extend(pending.drain(..).map(|c| PairingViolation::UnansweredCall {
                call_id: c.id.clone(),
                name: c.name.clone(),
            }));
            answered.clear();
            if message.role == Role::Assistant {
                pending.extend(message.tool_calls.iter());
            }
        }

        violations.extend(pending.into_iter().map(|c| PairingViolation::UnansweredCall {
            call_id: c.id.clone(),
            name: c.name.clone(),
        }));
        violations
    }

    /// Drop orphaned and duplicate tool results and answer every unanswered
    /// request with an `interrupted` failure. Returns the number of fixes.
    pub fn repair_pairing(&mut self) -> usize {
        let mut repaired = Vec::with_capacity(self.messages.len());
        let mut pending: Vec<ToolCall> = Vec::new();
        let mut fixes = 0;

        for message in std::mem::take(&mut self.messages) {
            if message.role == Role::Tool {
                let call_id = message.tool_call_id.as_deref().unwrap_or_default();
                if let Some(pos) = pending.iter().position(|c| c.id == call_id) {
                    pending.remove(pos);
                    repaired.push(message);
                } else {
                    tracing::warn!(call_id, "Dropping tool result with no open request");
                    fixes += 1;
                }
                continue;
            }

            fixes += close_round(&mut repaired, &mut pending);
            if message.role == Role::Assistant {
                pending.clone_from(&message.tool_calls);
            }
            repaired.push(message);
        }

        fixes += close_round(&mut repaired, &mut pending);
        self.messages = repaired;
        fixes
    }

    /// Truncate to fit within the token budget. Drops the oldest non-system
    /// units first; an assistant tool-call message and its results go
    /// together. The current turn (latest user message onward) is kept.
    /// Returns the number of messages removed.
    pub fn truncate_to_fit(&mut self) -> usize {
        let mut limit = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .unwrap_or_else(|| self.messages.len().saturating_sub(1));
        let before = self.messages.len();

        while self.estimate_tokens() > self.max_context_tokens {
            let Some((start, end)) = self.oldest_unit(limit) else {
                break;
            };
            self.messages.drain(start..end);
            limit -= end - start;
        }

        // History must not open on an assistant or tool message
        if self.messages.len() < before {
            while let Some((start, end)) = self.oldest_unit(limit) {
                if self.messages[start].role == Role::User {
                    break;
                }
                self.messages.drain(start..end);
                limit -= end - start;
            }
            tracing::debug!(removed = before - self.messages.len(), "Truncated conversation");
        }

        before - self.messages.len()
    }

    /// Bounds of the oldest non-system unit that lies entirely before `limit`
    fn oldest_unit(&self, limit: usize) -> Option<(usize, usize)> {
        let start = self.messages[..limit].iter().position(|m| m.role != Role::System)?;
        let mut end = start + 1;
        if self.messages[start].has_tool_calls() {
            while end < limit && self.messages[end].role == Role::Tool {
                end += 1;
            }
        }
        Some((start, end))
    }
}

fn close_round(out: &mut Vec<Message>, pending: &mut Vec<ToolCall>) -> usize {
    let count = pending.len();
    for call in pending.drain(..) {
        tracing::warn!(call_id = %call.id, tool = %call.name, "Answering unanswered tool call");
        let result = ToolResult::failure(
            &call,
            ToolFailureKind::Interrupted,
            "no result was recorded for this call",
        );
        out.push(Message::tool_result(&result));
    }
    count
}
