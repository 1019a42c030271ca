//! Bounds on autonomous agent execution.
//!
//! One `LoopController` per bounded run. Rules are evaluated in a fixed
//! priority order and the first match wins; see [`LoopController::should_continue`].

use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool-call signatures kept for repetition detection. Fixed window,
/// independent of the configured threshold.
const REPETITION_WINDOW: usize = 5;

/// Completion tokens the agent can emit in free text to end a run.
const COMPLETION_TOKENS: [&str; 3] = ["TASK_COMPLETE", "AGENT_COMPLETE", "WORK_FINISHED"];

/// Caps on a single bounded execution. All fields overridable via the
/// `[loop]` section of config.toml.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoopLimits {
    pub max_iterations: u32,
    pub max_tools_per_iteration: u32,
    pub timeout_seconds: u64,
    pub repetition_threshold: u32,
    pub max_pages_per_run: u32,
    pub max_edits_per_pr: u32,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_tools_per_iteration: 5,
            timeout_seconds: 300,
            repetition_threshold: 3,
            max_pages_per_run: 100,
            max_edits_per_pr: 10,
        }
    }
}

impl From<crate::config::LoopConfig> for LoopLimits {
    fn from(cfg: crate::config::LoopConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            max_tools_per_iteration: cfg.max_tools_per_iteration as u32,
            timeout_seconds: cfg.timeout_seconds,
            repetition_threshold: cfg.repetition_threshold as u32,
            max_pages_per_run: cfg.max_pages_per_run as u32,
            max_edits_per_pr: cfg.max_edits_per_pr as u32,
        }
    }
}

/// Why a bounded run stopped (or why it may continue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxIterationsReached,
    TimeoutExceeded,
    TooManyToolsPerIteration,
    RepetitiveBehaviorDetected,
    ExplicitCompletionSignal,
    NaturalCompletion,
    PageAnalysisLimitReached,
    EditLimitReached,
    Continue,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::MaxIterationsReached => "max_iterations_reached",
            StopReason::TimeoutExceeded => "timeout_exceeded",
            StopReason::TooManyToolsPerIteration => "too_many_tools_per_iteration",
            StopReason::RepetitiveBehaviorDetected => "repetitive_behavior_detected",
            StopReason::ExplicitCompletionSignal => "explicit_completion_signal",
            StopReason::NaturalCompletion => "natural_completion",
            StopReason::PageAnalysisLimitReached => "page_analysis_limit_reached",
            StopReason::EditLimitReached => "edit_limit_reached",
            StopReason::Continue => "continue",
        }
    }
}

/// One tool call as seen by the controller: name plus raw JSON arguments.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
}

/// Observability snapshot of a run.
#[derive(Debug, Clone, Serialize)]
pub struct LoopStats {
    pub elapsed_seconds: u64,
    pub pages_analyzed: usize,
    pub edits_made: usize,
    pub total_tool_calls: usize,
    pub unique_tool_calls: usize,
}

pub struct LoopController {
    limits: LoopLimits,
    started: Instant,
    /// Sliding window of the most recent signatures plus a full count for
    /// stats. The window slides across iterations; it is never reset.
    history: Vec<String>,
    total_calls: usize,
    pages_analyzed: HashSet<String>,
    edits_made: usize,
}

impl LoopController {
    pub fn new(limits: LoopLimits) -> Self {
        Self {
            limits,
            started: Instant::now(),
            history: Vec::new(),
            total_calls: 0,
            pages_analyzed: HashSet::new(),
            edits_made: 0,
        }
    }

    /// Evaluate the stop rules in priority order and return the first match.
    ///
    /// `tool_calls` are the calls made this iteration; `message_text` is the
    /// assistant's free text for this iteration. Signatures are recorded as a
    /// side effect so the repetition window keeps sliding even when an
    /// earlier rule fires.
    pub fn should_continue(
        &mut self,
        iteration: u32,
        tool_calls: &[ToolCall],
        message_text: &str,
    ) -> (bool, StopReason) {
        let repetition = self.record_and_check_repetition(tool_calls);

        if iteration >= self.limits.max_iterations {
            return (false, StopReason::MaxIterationsReached);
        }
        if self.started.elapsed().as_secs() > self.limits.timeout_seconds {
            return (false, StopReason::TimeoutExceeded);
        }
        if tool_calls.len() as u32 > self.limits.max_tools_per_iteration {
            return (false, StopReason::TooManyToolsPerIteration);
        }
        if repetition {
            return (false, StopReason::RepetitiveBehaviorDetected);
        }
        let upper = message_text.to_uppercase();
        if COMPLETION_TOKENS.iter().any(|t| upper.contains(t)) {
            return (false, StopReason::ExplicitCompletionSignal);
        }
        if tool_calls.is_empty() {
            return (false, StopReason::NaturalCompletion);
        }
        if self.pages_analyzed.len() as u32 > self.limits.max_pages_per_run {
            return (false, StopReason::PageAnalysisLimitReached);
        }
        if self.edits_made as u32 > self.limits.max_edits_per_pr {
            return (false, StopReason::EditLimitReached);
        }
        (true, StopReason::Continue)
    }

    /// Append each call's signature to the history and flag repetition when
    /// the signature already appears `repetition_threshold` or more times
    /// within the last `REPETITION_WINDOW` recorded entries.
    fn record_and_check_repetition(&mut self, tool_calls: &[ToolCall]) -> bool {
        let mut repeated = false;
        for call in tool_calls {
            let sig = signature(&call.name, &call.args);
            let window_start = self.history.len().saturating_sub(REPETITION_WINDOW);
            let count = self.history[window_start..]
                .iter()
                .filter(|s| **s == sig)
                .count();
            if count >= self.limits.repetition_threshold as usize {
                repeated = true;
            }
            self.history.push(sig);
            self.total_calls += 1;
        }
        repeated
    }

    pub fn record_page_analyzed(&mut self, title: &str) {
        self.pages_analyzed.insert(title.to_string());
    }

    pub fn record_change(&mut self) {
        self.edits_made += 1;
    }

    pub fn stats(&self) -> LoopStats {
        let unique: HashSet<&String> = self.history.iter().collect();
        LoopStats {
            elapsed_seconds: self.started.elapsed().as_secs(),
            pages_analyzed: self.pages_analyzed.len(),
            edits_made: self.edits_made,
            total_tool_calls: self.total_calls,
            unique_tool_calls: unique.len(),
        }
    }
}

/// Deterministic signature: tool name + arguments serialized with object keys
/// sorted, so `{a:1,b:2}` and `{b:2,a:1}` produce the same signature.
pub fn signature(name: &str, args: &Value) -> String {
    format!("{name}({})", canonical(args))
}

fn canonical(v: &Value) -> String {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", k, canonical(&map[k])))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}
