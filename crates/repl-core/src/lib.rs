//! # repl-core
//!
//! Provider-agnostic tool-calling conversation loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Session                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │ Conversation │  │ ToolExecutor │  │  BackendSelector   │  │
//! │  │  (transcript)│──│    (loop)    │──│  (LlmProvider x N) │  │
//! │  └──────────────┘  └──────┬───────┘  └────────────────────┘  │
//! │                           │                                  │
//! │                    ┌──────┴───────┐                          │
//! │                    │  ToolSource  │                          │
//! │                    └──────────────┘                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait hides each vendor's tool-calling format, and
//! `ToolSource` is queried by name every round, so backends can be switched
//! and tools can come and go without touching the loop.

pub mod backend;
pub mod error;
pub mod executor;
pub mod message;
pub mod parse;
pub mod provider;
pub mod session;
pub mod tool;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{ActiveBackend, BackendDescriptor, BackendSelector};
pub use error::{AgentError, Result};
pub use executor::{DispatchMode, ExecutorConfig, FinalAnswer, Outcome, SharedConversation, ToolExecutor};
pub use message::{Conversation, Message, Role};
pub use provider::{Completion, GenerationOptions, LlmProvider};
pub use session::{Session, SessionId};
pub use tool::{
    ParameterSchema, Tool, ToolCall, ToolFailureKind, ToolOutcome, ToolOutput, ToolRegistry, ToolResult, ToolSchema,
    ToolSource,
};
