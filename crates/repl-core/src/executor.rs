//! Tool-Calling Loop
//!
//! Drives one user utterance to a final answer: inference rounds against the
//! current backend, interleaved with tool dispatch, until the model answers
//! without requesting tools or the round bound is hit.
//!
//! Each round's tools run in a spawned task that owns the conversation lock.
//! If the caller drops `execute` mid-round, the tools still finish and their
//! results are still written to the transcript.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::backend::{ActiveBackend, BackendSelector};
use crate::error::{AgentError, Result};
use crate::message::{Conversation, Message, Role};
use crate::parse;
use crate::provider::{Completion, GenerationOptions};
use crate::tool::{self, Tool, ToolCall, ToolFailureKind, ToolResult, ToolSchema, ToolSource};

/// Conversation handle shared between a session and in-flight tool rounds
pub type SharedConversation = Arc<Mutex<Conversation>>;

const DEFAULT_SYSTEM_PROMPT: &str = r"You are a helpful AI assistant with access to tools for reading and writing files, searching, and running shell commands.

Use a tool whenever it helps you answer accurately. When a tool fails, read the error, explain it to the user, and try a different approach if one makes sense.
After receiving tool results, synthesize them into a helpful response.
If you can answer directly without tools, do so.
Be concise and accurate.";

/// How the tool calls of one round are run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// One after another, in request order
    #[default]
    Sequential,
    /// All at once; results are still recorded in request order
    Concurrent,
}

/// Loop configuration
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Inserted at the head of conversations that have none
    pub system_prompt: Option<String>,

    /// Maximum inference rounds per `execute` call
    pub max_rounds: usize,

    /// Limit for one inference call
    pub round_timeout: Duration,

    /// Limit for one tool invocation
    pub tool_timeout: Duration,

    pub dispatch: DispatchMode,

    /// Generation options; the model is taken from the backend selector
    pub generation: GenerationOptions,

    /// Context budget for new conversations, in estimated tokens
    pub max_context_tokens: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.into()),
            max_rounds: 10,
            round_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(60),
            dispatch: DispatchMode::Sequential,
            generation: GenerationOptions::default(),
            max_context_tokens: 32_768,
        }
    }
}

/// How an `execute` call ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// The model answered without requesting tools
    Completed,
    /// The round bound was hit; the text is a best-effort answer
    RoundLimitReached { limit: usize },
}

/// Answer returned to the caller
#[derive(Clone, Debug, Serialize)]
pub struct FinalAnswer {
    pub text: String,
    pub outcome: Outcome,
    /// Inference rounds run
    pub rounds: usize,
    /// Tool calls dispatched across all rounds
    pub tool_calls: usize,
    /// Backend and model of the last round
    pub backend: String,
    pub model: String,
}

impl FinalAnswer {
    pub fn is_complete(&self) -> bool {
        self.outcome == Outcome::Completed
    }
}

/// A resolved tool call waiting to run
struct DispatchJob {
    call: ToolCall,
    tool: Option<Arc<dyn Tool>>,
}

/// The tool-calling loop
pub struct ToolExecutor {
    selector: Arc<BackendSelector>,
    tools: Arc<dyn ToolSource>,
    config: ExecutorConfig,
}

impl ToolExecutor {
    /// Create a new executor
    pub fn new(selector: Arc<BackendSelector>, tools: Arc<dyn ToolSource>, config: ExecutorConfig) -> Self {
        Self {
            selector,
            tools,
            config,
        }
    }

    /// Create with default configuration
    pub fn with_defaults(selector: Arc<BackendSelector>, tools: Arc<dyn ToolSource>) -> Self {
        Self::new(selector, tools, ExecutorConfig::default())
    }

    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    pub fn tools(&self) -> &dyn ToolSource {
        self.tools.as_ref()
    }

    /// Run a single tool call outside the loop. Same validation, timeout and
    /// failure mapping as a dispatched call; nothing reaches the transcript.
    pub async fn invoke(&self, call: ToolCall) -> ToolResult {
        let tool = self.tools.resolve(&call.name);
        run_job(DispatchJob { call, tool }, self.config.tool_timeout).await
    }

    /// Run one user utterance to a final answer.
    ///
    /// Fails only on invalid input or a provider-class error; in the latter
    /// case the user message and any completed rounds stay in the transcript.
    /// Tool failures are written to the transcript for the model to read.
    pub async fn execute(&self, user_message: &str, conversation: &SharedConversation) -> Result<FinalAnswer> {
        if user_message.trim().is_empty() {
            return Err(AgentError::EmptyMessage);
        }

        let mut conv = Arc::clone(conversation).lock_owned().await;

        if let Some(prompt) = &self.config.system_prompt {
            conv.ensure_system_prompt(prompt);
        }
        let repaired = conv.repair_pairing();
        if repaired > 0 {
            tracing::warn!(repaired, "Repaired tool call pairing before new turn");
        }
        conv.push(Message::user(user_message));

        let max_rounds = self.config.max_rounds.max(1);
        let mut last_text: Option<String> = None;
        let mut dispatched = 0;
        let mut backend_name = String::new();
        let mut model = String::new();

        for round in 1..=max_rounds {
            let backend = self.selector.current()?;
            backend_name.clone_from(&backend.name);
            model.clone_from(&backend.model);

            let schemas = self.tools.schemas();
            conv.truncate_to_fit();

            tracing::debug!(round, backend = %backend.name, model = %backend.model, tools = schemas.len(), "Inference round");
            let completion = self.infer(&backend, conv.messages(), &schemas).await?;
            let (text, mut calls) = split_completion(&backend, completion);

            if calls.is_empty() {
                let text = text.unwrap_or_default();
                conv.push(Message::assistant(text.clone()).with_model(&backend.model));
                return Ok(FinalAnswer {
                    text,
                    outcome: Outcome::Completed,
                    rounds: round,
                    tool_calls: dispatched,
                    backend: backend_name,
                    model,
                });
            }

            parse::normalize_call_ids(&mut calls);
            if let Some(text) = text.as_ref().filter(|t| !t.trim().is_empty()) {
                last_text = Some(text.clone());
            }
            conv.push(Message::assistant_with_calls(text, calls.clone()).with_model(&backend.model));

            let jobs: Vec<DispatchJob> = calls
                .into_iter()
                .map(|call| {
                    let tool = self.tools.resolve(&call.name);
                    DispatchJob { call, tool }
                })
                .collect();
            dispatched += jobs.len();

            let handle = tokio::spawn(dispatch_round(
                conv,
                jobs,
                self.config.dispatch,
                self.config.tool_timeout,
            ));
            conv = handle
                .await
                .map_err(|e| AgentError::Other(format!("tool round aborted: {e}")))?;
        }

        tracing::warn!(limit = max_rounds, "Round limit reached without a final answer");
        let text = last_text.unwrap_or_else(|| {
            format!("I could not complete this request within {max_rounds} tool rounds.")
        });
        conv.push(Message::assistant(text.clone()).with_model(&model));

        Ok(FinalAnswer {
            text,
            outcome: Outcome::RoundLimitReached { limit: max_rounds },
            rounds: max_rounds,
            tool_calls: dispatched,
            backend: backend_name,
            model,
        })
    }

    /// One inference call under the round timeout
    async fn infer(&self, backend: &ActiveBackend, messages: &[Message], schemas: &[ToolSchema]) -> Result<Completion> {
        let options = GenerationOptions {
            model: backend.model.clone(),
            ..self.config.generation.clone()
        };

        let request = async {
            if backend.provider.supports_native_tools() {
                backend.provider.complete(messages, schemas, &options).await
            } else {
                let messages = with_tool_catalogue(messages, schemas);
                backend.provider.complete(&messages, &[], &options).await
            }
        };

        let started = Instant::now();
        let completion = tokio::time::timeout(self.config.round_timeout, request)
            .await
            .map_err(|_| AgentError::ProviderTimeout(self.config.round_timeout))
            .and_then(|r| r)
            .inspect_err(|e| tracing::warn!(backend = %backend.name, error = %e, "Inference failed"))?;

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis(),
            tool_calls = completion.tool_calls.len(),
            "Inference complete"
        );
        Ok(completion)
    }
}

/// Separate narrative text from tool calls. Calls win over text: a response
/// carrying both continues the loop.
fn split_completion(backend: &ActiveBackend, completion: Completion) -> (Option<String>, Vec<ToolCall>) {
    if backend.provider.supports_native_tools() || completion.wants_tools() {
        return (completion.content, completion.tool_calls);
    }

    let content = completion.content.unwrap_or_default();
    let calls = parse::extract_fenced_calls(&content);
    if calls.is_empty() {
        (Some(content), calls)
    } else {
        (Some(parse::strip_fenced_calls(&content)), calls)
    }
}

/// Transcript copy whose system prompt lists the tools, for providers that
/// cannot take schemas natively
fn with_tool_catalogue(messages: &[Message], schemas: &[ToolSchema]) -> Vec<Message> {
    let mut messages = messages.to_vec();
    if schemas.is_empty() {
        return messages;
    }

    let section = tool::generate_prompt_section(schemas);
    match messages.first_mut() {
        Some(first) if first.role == Role::System => {
            let prompt = format!("{}\n\n{section}", first.text());
            first.content = Some(prompt);
        }
        _ => messages.insert(0, Message::system(section)),
    }
    messages
}

/// Run a round's calls and append one tool message per call, in request order
async fn dispatch_round(
    mut conv: OwnedMutexGuard<Conversation>,
    jobs: Vec<DispatchJob>,
    mode: DispatchMode,
    timeout: Duration,
) -> OwnedMutexGuard<Conversation> {
    match mode {
        DispatchMode::Sequential => {
            for job in jobs {
                let result = run_job(job, timeout).await;
                conv.push(Message::tool_result(&result));
            }
        }
        DispatchMode::Concurrent => {
            let results = join_all(jobs.into_iter().map(|job| run_job(job, timeout))).await;
            for result in &results {
                conv.push(Message::tool_result(result));
            }
        }
    }
    conv
}

/// Execute a single call. Every failure becomes a failure result.
async fn run_job(job: DispatchJob, timeout: Duration) -> ToolResult {
    let DispatchJob { call, tool } = job;

    let Some(tool) = tool else {
        tracing::warn!(tool = %call.name, "Tool not found");
        let error = AgentError::ToolNotFound(call.name.clone());
        return ToolResult::failure(&call, ToolFailureKind::NotFound, error);
    };

    match std::panic::catch_unwind(AssertUnwindSafe(|| tool.validate(&call))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(tool = %call.name, error = %e, "Rejected tool arguments");
            return ToolResult::failure(&call, ToolFailureKind::InvalidArguments, e);
        }
        Err(_) => {
            tracing::warn!(tool = %call.name, "Tool validator panicked");
            return ToolResult::failure(&call, ToolFailureKind::InvalidArguments, "argument validation panicked");
        }
    }

    tracing::debug!(tool = %call.name, id = %call.id, "Executing tool");
    let started = Instant::now();

    let outcome = tokio::time::timeout(timeout, AssertUnwindSafe(tool.execute(&call)).catch_unwind()).await;
    let result = match outcome {
        Err(_) => ToolResult::failure(
            &call,
            ToolFailureKind::Timeout,
            format!("no result after {:.1}s", timeout.as_secs_f64()),
        ),
        Ok(Err(_)) => ToolResult::failure(&call, ToolFailureKind::Execution, "tool panicked"),
        Ok(Ok(Err(AgentError::ToolValidation(msg)))) => {
            ToolResult::failure(&call, ToolFailureKind::InvalidArguments, msg)
        }
        Ok(Ok(Err(e))) => ToolResult::failure(&call, ToolFailureKind::Execution, e),
        Ok(Ok(Ok(output))) if output.is_error => {
            ToolResult::failure(&call, ToolFailureKind::Execution, output.content)
        }
        Ok(Ok(Ok(output))) => ToolResult::success(&call, output),
    };

    if let Some(kind) = result.failure_kind() {
        tracing::warn!(tool = %call.name, %kind, "Tool call failed");
    }
    tracing::debug!(tool = %call.name, elapsed_ms = started.elapsed().as_millis(), "Tool finished");
    result
}
