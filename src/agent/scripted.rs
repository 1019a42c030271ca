//! Deterministic executor used by the integration tests and as the binary's
//! default when no vendor adapter is wired in.
//!
//! Each queued [`ScriptedTurn`] lists the tool calls to make (executed for
//! real against the supplied tool set) and the free-text response to return.
//! When the script runs out, further turns complete with an empty response
//! and no tool calls, which the loop controller reads as natural completion.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::Mutex;

use crate::agent::executor::{ConversationExecutor, ToolCallRecord, TurnOutcome, TurnStatus};
use crate::tools::ToolSet;

#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub tool_calls: Vec<(String, Value)>,
    pub response: String,
}

impl ScriptedTurn {
    pub fn say(response: impl Into<String>) -> Self {
        Self {
            tool_calls: Vec::new(),
            response: response.into(),
        }
    }

    pub fn call(mut self, name: impl Into<String>, args: Value) -> Self {
        self.tool_calls.push((name.into(), args));
        self
    }
}

#[derive(Default)]
pub struct ScriptedExecutor {
    turns: Mutex<VecDeque<ScriptedTurn>>,
}

impl ScriptedExecutor {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
        }
    }
}

#[async_trait]
impl ConversationExecutor for ScriptedExecutor {
    async fn start_session(&self, _system_prompt: &str) -> Result<()> {
        Ok(())
    }

    async fn process_turn(&self, _user_message: &str, tools: &ToolSet) -> TurnOutcome {
        let turn = self.turns.lock().await.pop_front().unwrap_or_default();
        let mut records = Vec::with_capacity(turn.tool_calls.len());
        for (name, args) in turn.tool_calls {
            let result = tools.invoke(&name, args.clone()).await;
            records.push(ToolCallRecord { name, args, result });
        }
        TurnOutcome {
            status: TurnStatus::Completed,
            final_response: turn.response,
            tool_calls: records,
            error: None,
        }
    }
}
