//! Thread and message data models.
//!
//! These types are stored in SQLite and serialized over the WebSocket wire.
//! Thread IDs use the `th-{uuid8}` format; message IDs are full UUID v4.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::tools::Capability;

/// The role a thread plays in the collaboration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadKind {
    /// Per-user conversational front door — reads the wiki and spawns
    /// workers, never edits pages and never owns a branch.
    Assistant,
    /// Scoped to one goal, runs in its own git branch + worktree, can call
    /// file-write tools and goes through the review workflow.
    Worker,
}

impl ThreadKind {
    /// Canonical SQL string stored in `threads.kind`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadKind::Assistant => "assistant",
            ThreadKind::Worker => "worker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assistant" => Some(ThreadKind::Assistant),
            "worker" => Some(ThreadKind::Worker),
            _ => None,
        }
    }

    /// Status a freshly created thread of this kind starts in.
    pub fn initial_status(&self) -> ThreadStatus {
        match self {
            ThreadKind::Assistant => ThreadStatus::Active,
            ThreadKind::Worker => ThreadStatus::Working,
        }
    }

    /// The capability tags fixed at creation. Tool sets are built from these
    /// plus the required callbacks — never from the thread's runtime shape.
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            ThreadKind::Assistant => &[
                Capability::Read,
                Capability::Spawn,
                Capability::ThreadAnalysis,
            ],
            ThreadKind::Worker => &[
                Capability::Read,
                Capability::Write,
                Capability::Lifecycle,
                Capability::ThreadAnalysis,
            ],
        }
    }

    /// The fixed first message run through the agent when the thread starts.
    /// Assistants wait for the user instead.
    pub fn initial_message(&self, goal: Option<&str>) -> Option<String> {
        match self {
            ThreadKind::Assistant => None,
            ThreadKind::Worker => Some(format!(
                "Your goal: {}\n\nWork inside your own branch. When the goal is \
                 complete, call mark_for_review with a short summary. If you are \
                 stuck, call request_help. Begin.",
                goal.unwrap_or("(no goal provided)")
            )),
        }
    }

    /// Post-turn policy: the follow-up prompt to feed the agent for another
    /// bounded turn, or `None` to stop after this one.
    ///
    /// Workers keep going while they are still `Working` (the loop controller
    /// bounds the total); assistants answer one user message per turn.
    pub fn post_turn_prompt(&self, status: ThreadStatus) -> Option<&'static str> {
        match (self, status) {
            (ThreadKind::Worker, ThreadStatus::Working) => Some(
                "Continue working toward your goal. Call mark_for_review when done.",
            ),
            _ => None,
        }
    }
}

impl std::fmt::Display for ThreadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a thread.
///
/// Assistants use `{Active, Archived}`; workers use
/// `{Working, NeedHelp, Review, Accepted, Rejected}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Working,
    NeedHelp,
    Review,
    Accepted,
    Rejected,
    Archived,
}

impl ThreadStatus {
    /// Canonical SQL string stored in `threads.status`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Active => "active",
            ThreadStatus::Working => "working",
            ThreadStatus::NeedHelp => "need_help",
            ThreadStatus::Review => "review",
            ThreadStatus::Accepted => "accepted",
            ThreadStatus::Rejected => "rejected",
            ThreadStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ThreadStatus::Active),
            "working" => Some(ThreadStatus::Working),
            "need_help" => Some(ThreadStatus::NeedHelp),
            "review" => Some(ThreadStatus::Review),
            "accepted" => Some(ThreadStatus::Accepted),
            "rejected" => Some(ThreadStatus::Rejected),
            "archived" => Some(ThreadStatus::Archived),
            _ => None,
        }
    }

    /// Terminal statuses are sticky: no code path transitions out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ThreadStatus::Accepted | ThreadStatus::Rejected | ThreadStatus::Archived
        )
    }

    /// Accept is permitted only from `Review` (see DESIGN.md).
    pub fn can_accept(&self) -> bool {
        matches!(self, ThreadStatus::Review)
    }

    /// Reject is permitted from any non-terminal worker state so users can
    /// abandon a thread without waiting for review.
    pub fn can_reject(&self) -> bool {
        matches!(
            self,
            ThreadStatus::Working | ThreadStatus::NeedHelp | ThreadStatus::Review
        )
    }

    /// Whole transition table for both thread kinds.
    pub fn can_transition(&self, to: ThreadStatus) -> bool {
        use ThreadStatus::*;
        match (self, to) {
            (Active, Archived) => true,
            (Working, NeedHelp) | (Working, Review) | (Working, Rejected) => true,
            (NeedHelp, Working) | (NeedHelp, Review) | (NeedHelp, Rejected) => true,
            (Review, Working) | (Review, Accepted) | (Review, Rejected) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collaboration thread — conversation + goal + (for workers) an isolated
/// git branch/worktree + lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub kind: ThreadKind,
    pub status: ThreadStatus,
    /// Task description, set once at creation for workers; absent for assistants.
    pub goal: Option<String>,
    /// `thread/{slug}-{suffix}` branch; workers only.
    pub branch: Option<String>,
    /// Non-`None` iff branch initialization succeeded.
    pub worktree_path: Option<PathBuf>,
    /// Set when the thread transitions into `Review`.
    pub review_summary: Option<String>,
    /// Last fatal error, if any.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Role of one turn unit inside a thread's conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    ToolCall,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::ToolCall => "tool_call",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            "tool_call" => Some(MessageRole::ToolCall),
            _ => None,
        }
    }
}

/// One immutable entry in a thread's append-only conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<String>,
    /// Originating user for multi-party threads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Construct a thread ID in the canonical `th-{uuid8}` format.
pub fn new_thread_id() -> String {
    let u = uuid::Uuid::new_v4().to_string();
    let short = u.split('-').next().unwrap_or(&u[..8]);
    format!("th-{}", short)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_sticky() {
        for terminal in [
            ThreadStatus::Accepted,
            ThreadStatus::Rejected,
            ThreadStatus::Archived,
        ] {
            assert!(terminal.is_terminal());
            for to in [
                ThreadStatus::Active,
                ThreadStatus::Working,
                ThreadStatus::NeedHelp,
                ThreadStatus::Review,
                ThreadStatus::Accepted,
                ThreadStatus::Rejected,
                ThreadStatus::Archived,
            ] {
                assert!(
                    !terminal.can_transition(to),
                    "{terminal} -> {to} must be illegal"
                );
            }
        }
    }

    #[test]
    fn review_entered_only_from_working_or_need_help() {
        assert!(ThreadStatus::Working.can_transition(ThreadStatus::Review));
        assert!(ThreadStatus::NeedHelp.can_transition(ThreadStatus::Review));
        assert!(!ThreadStatus::Active.can_transition(ThreadStatus::Review));
        assert!(!ThreadStatus::Review.can_transition(ThreadStatus::Review));
    }

    #[test]
    fn accept_only_from_review() {
        assert!(ThreadStatus::Review.can_accept());
        assert!(!ThreadStatus::Working.can_accept());
        assert!(!ThreadStatus::NeedHelp.can_accept());
        assert!(!ThreadStatus::Accepted.can_accept());
    }

    #[test]
    fn reject_from_any_live_worker_state() {
        assert!(ThreadStatus::Working.can_reject());
        assert!(ThreadStatus::NeedHelp.can_reject());
        assert!(ThreadStatus::Review.can_reject());
        assert!(!ThreadStatus::Rejected.can_reject());
        assert!(!ThreadStatus::Archived.can_reject());
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [
            ThreadStatus::Active,
            ThreadStatus::Working,
            ThreadStatus::NeedHelp,
            ThreadStatus::Review,
            ThreadStatus::Accepted,
            ThreadStatus::Rejected,
            ThreadStatus::Archived,
        ] {
            assert_eq!(ThreadStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ThreadStatus::parse("bogus"), None);
    }

    #[test]
    fn assistant_capabilities_exclude_write() {
        let caps = ThreadKind::Assistant.capabilities();
        assert!(!caps.contains(&Capability::Write));
        assert!(!caps.contains(&Capability::Lifecycle));
        assert!(caps.contains(&Capability::Spawn));
    }

    #[test]
    fn worker_capabilities_exclude_spawn() {
        let caps = ThreadKind::Worker.capabilities();
        assert!(!caps.contains(&Capability::Spawn));
        assert!(caps.contains(&Capability::Write));
        assert!(caps.contains(&Capability::Lifecycle));
    }

    #[test]
    fn thread_id_format() {
        let id = new_thread_id();
        assert!(id.starts_with("th-"));
        assert_eq!(id.len(), 11);
    }
}
