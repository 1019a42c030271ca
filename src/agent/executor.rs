//! The LLM-conversation executor seam.
//!
//! The orchestrator treats an executor as an opaque bounded-turn black box:
//! it is handed one user message plus the thread's capability-scoped tool
//! set, runs its internal tool-calling loop, and reports what happened.
//! Vendor adapters implement this trait out of crate; the in-crate
//! [`crate::agent::ScriptedExecutor`] drives the tests.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::tools::ToolSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Error,
}

/// One tool invocation made during a turn, reported back for logging and
/// loop-control accounting.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub name: String,
    pub args: Value,
    pub result: String,
}

/// Everything the orchestrator learns from one bounded turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    /// The assistant's final free-text response for this turn.
    pub final_response: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub error: Option<String>,
}

impl TurnOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: TurnStatus::Error,
            final_response: String::new(),
            tool_calls: Vec::new(),
            error: Some(message),
        }
    }
}

#[async_trait]
pub trait ConversationExecutor: Send + Sync {
    /// Prime the session with its system prompt. Called once per executor.
    async fn start_session(&self, system_prompt: &str) -> Result<()>;

    /// Run one bounded turn: feed `user_message`, let the model call tools
    /// from `tools` within the executor's internal bound, return the outcome.
    /// Failures are reported in the outcome, not raised, so one bad provider
    /// response never unwinds the orchestrator.
    async fn process_turn(&self, user_message: &str, tools: &ToolSet) -> TurnOutcome;
}
