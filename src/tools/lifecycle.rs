//! Lifecycle capability: worker-only status control.
//!
//! `mark_for_review` finalizes any in-progress merge (left by the
//! conflict-resolution flow) and commits outstanding edits before moving the
//! thread to `Review`. `request_help` parks the thread in `NeedHelp` and
//! notifies the viewing clients.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::manager::events::{ClientRegistry, WsEvent};
use crate::storage::Storage;
use crate::threads::model::{MessageRole, ThreadStatus};
use crate::wiki::WikiStore;

use super::{req_str, ToolContext, ToolHandler};

pub fn install(ctx: &ToolContext, handlers: &mut Vec<Arc<dyn ToolHandler>>) {
    let shared = Arc::new(LifecycleHandles {
        storage: ctx.storage.clone(),
        wiki: ctx.wiki.clone(),
        registry: ctx.registry.clone(),
        thread_id: ctx.thread.id.clone(),
        worktree: ctx.thread.worktree_path.clone(),
    });
    handlers.push(Arc::new(RequestHelp(shared.clone())));
    handlers.push(Arc::new(MarkForReview(shared.clone())));
    handlers.push(Arc::new(GetThreadStatus(shared.clone())));
    handlers.push(Arc::new(SetThreadStatus(shared.clone())));
    handlers.push(Arc::new(GetThreadName(shared.clone())));
    handlers.push(Arc::new(SetThreadName(shared)));
}

struct LifecycleHandles {
    storage: Arc<Storage>,
    wiki: Arc<WikiStore>,
    registry: Arc<ClientRegistry>,
    thread_id: String,
    worktree: Option<PathBuf>,
}

impl LifecycleHandles {
    async fn current_status(&self) -> Result<ThreadStatus, String> {
        match self.storage.get_thread(&self.thread_id).await {
            Ok(Some(t)) => Ok(t.status),
            Ok(None) => Err(format!("Error: thread {} no longer exists", self.thread_id)),
            Err(e) => Err(format!("Error: failed to load thread: {e}")),
        }
    }

    async fn transition(&self, to: ThreadStatus) -> Result<(), String> {
        let from = self.current_status().await?;
        if !from.can_transition(to) {
            return Err(format!("Error: cannot transition from '{from}' to '{to}'"));
        }
        self.storage
            .update_thread_status(&self.thread_id, to)
            .await
            .map_err(|e| format!("Error: failed to update status: {e}"))
    }

    async fn broadcast_status(&self, status: ThreadStatus, review_summary: Option<String>) {
        self.registry
            .broadcast_to_thread_viewers(
                &self.thread_id,
                WsEvent::ThreadStatus {
                    thread_id: self.thread_id.clone(),
                    status,
                    review_summary,
                    error: None,
                },
            )
            .await;
    }
}

struct RequestHelp(Arc<LifecycleHandles>);

#[async_trait]
impl ToolHandler for RequestHelp {
    fn name(&self) -> &'static str {
        "request_help"
    }

    fn description(&self) -> &'static str {
        "Pause and ask the user a question. Args: {question}"
    }

    async fn call(&self, args: Value) -> String {
        let question = match req_str(&args, "question") {
            Ok(q) => q,
            Err(e) => return e,
        };
        if let Err(e) = self.0.transition(ThreadStatus::NeedHelp).await {
            return e;
        }
        if let Err(e) = self
            .0
            .storage
            .append_message(
                &self.0.thread_id,
                MessageRole::System,
                &format!("Agent requested help: {question}"),
                None,
                None,
                None,
                None,
            )
            .await
        {
            warn!(thread_id = %self.0.thread_id, err = %e, "failed to record help request");
        }
        self.0
            .broadcast_status(ThreadStatus::NeedHelp, None)
            .await;
        "Thread paused; the user has been asked for help.".to_string()
    }
}

struct MarkForReview(Arc<LifecycleHandles>);

#[async_trait]
impl ToolHandler for MarkForReview {
    fn name(&self) -> &'static str {
        "mark_for_review"
    }

    fn description(&self) -> &'static str {
        "Finish work and submit the thread for human review. Args: {summary}"
    }

    async fn call(&self, args: Value) -> String {
        let summary = match req_str(&args, "summary") {
            Ok(s) => s,
            Err(e) => return e,
        };
        let Some(worktree) = self.0.worktree.as_deref() else {
            return "Error: thread has no worktree".to_string();
        };

        // An unfinished merge means we are mid conflict resolution: the
        // resolved state must be committed before review.
        match self.0.wiki.merge_in_progress(worktree).await {
            Ok(true) => {
                if let Err(e) = self
                    .0
                    .wiki
                    .finalize_merge(worktree, "Merge trunk (conflicts resolved)")
                    .await
                {
                    return format!("Error: conflicts are not fully resolved: {e}");
                }
            }
            Ok(false) => {}
            Err(e) => return format!("Error: failed to inspect merge state: {e}"),
        }
        if let Err(e) = self
            .0
            .wiki
            .commit_all(worktree, "Finalize work for review")
            .await
        {
            return format!("Error: failed to commit outstanding edits: {e}");
        }

        if let Err(e) = self.0.transition(ThreadStatus::Review).await {
            return e;
        }
        if let Err(e) = self
            .0
            .storage
            .set_thread_review_summary(&self.0.thread_id, &summary)
            .await
        {
            return format!("Error: failed to store review summary: {e}");
        }
        self.0
            .broadcast_status(ThreadStatus::Review, Some(summary))
            .await;
        "Thread submitted for review.".to_string()
    }
}

struct GetThreadStatus(Arc<LifecycleHandles>);

#[async_trait]
impl ToolHandler for GetThreadStatus {
    fn name(&self) -> &'static str {
        "get_thread_status"
    }

    fn description(&self) -> &'static str {
        "Get this thread's lifecycle status. Args: {}"
    }

    async fn call(&self, _args: Value) -> String {
        match self.0.current_status().await {
            Ok(status) => status.as_str().to_string(),
            Err(e) => e,
        }
    }
}

struct SetThreadStatus(Arc<LifecycleHandles>);

#[async_trait]
impl ToolHandler for SetThreadStatus {
    fn name(&self) -> &'static str {
        "set_thread_status"
    }

    fn description(&self) -> &'static str {
        "Set this thread's lifecycle status (legal transitions only). Args: {status}"
    }

    async fn call(&self, args: Value) -> String {
        let raw = match req_str(&args, "status") {
            Ok(s) => s,
            Err(e) => return e,
        };
        let Some(status) = ThreadStatus::parse(&raw) else {
            return format!("Error: unknown status '{raw}'");
        };
        match self.0.transition(status).await {
            Ok(()) => {
                self.0.broadcast_status(status, None).await;
                format!("Status set to '{status}'")
            }
            Err(e) => e,
        }
    }
}

struct GetThreadName(Arc<LifecycleHandles>);

#[async_trait]
impl ToolHandler for GetThreadName {
    fn name(&self) -> &'static str {
        "get_thread_name"
    }

    fn description(&self) -> &'static str {
        "Get this thread's display name. Args: {}"
    }

    async fn call(&self, _args: Value) -> String {
        match self.0.storage.get_thread(&self.0.thread_id).await {
            Ok(Some(t)) => t.name,
            Ok(None) => format!("Error: thread {} no longer exists", self.0.thread_id),
            Err(e) => format!("Error: failed to load thread: {e}"),
        }
    }
}

struct SetThreadName(Arc<LifecycleHandles>);

#[async_trait]
impl ToolHandler for SetThreadName {
    fn name(&self) -> &'static str {
        "set_thread_name"
    }

    fn description(&self) -> &'static str {
        "Rename this thread. Args: {name}"
    }

    async fn call(&self, args: Value) -> String {
        let name = match req_str(&args, "name") {
            Ok(n) => n,
            Err(e) => return e,
        };
        match self.0.storage.set_thread_name(&self.0.thread_id, &name).await {
            Ok(()) => format!("Thread renamed to '{name}'"),
            Err(e) => format!("Error: failed to rename thread: {e}"),
        }
    }
}
