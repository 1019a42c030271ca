//! Spawn capability: assistant-only worker creation and active-thread listing.
//!
//! The spawn tool is the only piece of the tool layer that reaches back into
//! the orchestrator, through the narrow `WorkerSpawner` seam.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::threads::model::{Thread, ThreadStatus};

use super::{req_str, ToolContext, ToolHandler};

#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    /// Create a worker thread with a branch + worktree and start its run.
    async fn spawn_worker(&self, owner_id: &str, name: &str, goal: &str) -> Result<Thread>;

    /// All non-terminal threads, for the listing tool.
    async fn active_threads(&self) -> Result<Vec<Thread>>;
}

pub fn install(ctx: &ToolContext, handlers: &mut Vec<Arc<dyn ToolHandler>>) {
    let Some(spawner) = ctx.spawner.clone() else {
        return;
    };
    handlers.push(Arc::new(SpawnWorker {
        spawner: spawner.clone(),
        owner_id: ctx.thread.owner_id.clone(),
    }));
    handlers.push(Arc::new(ListActiveThreads { spawner }));
}

struct SpawnWorker {
    spawner: Arc<dyn WorkerSpawner>,
    owner_id: String,
}

#[async_trait]
impl ToolHandler for SpawnWorker {
    fn name(&self) -> &'static str {
        "spawn_worker"
    }

    fn description(&self) -> &'static str {
        "Create a worker thread that edits the wiki on its own branch toward \
         a goal. Args: {name, goal}"
    }

    async fn call(&self, args: Value) -> String {
        let name = match req_str(&args, "name") {
            Ok(n) => n,
            Err(e) => return e,
        };
        let goal = match req_str(&args, "goal") {
            Ok(g) => g,
            Err(e) => return e,
        };
        match self.spawner.spawn_worker(&self.owner_id, &name, &goal).await {
            Ok(thread) => format!(
                "Spawned worker '{}' (id {}, branch {}, status {})",
                thread.name,
                thread.id,
                thread.branch.as_deref().unwrap_or("-"),
                thread.status
            ),
            Err(e) => format!("Error: failed to spawn worker: {e}"),
        }
    }
}

struct ListActiveThreads {
    spawner: Arc<dyn WorkerSpawner>,
}

fn status_glyph(status: ThreadStatus) -> &'static str {
    match status {
        ThreadStatus::Active => "●",
        ThreadStatus::Working => "⚙",
        ThreadStatus::NeedHelp => "?",
        ThreadStatus::Review => "👁",
        ThreadStatus::Accepted => "✓",
        ThreadStatus::Rejected => "✗",
        ThreadStatus::Archived => "□",
    }
}

#[async_trait]
impl ToolHandler for ListActiveThreads {
    fn name(&self) -> &'static str {
        "list_active_threads"
    }

    fn description(&self) -> &'static str {
        "List currently active threads with their status. Args: {}"
    }

    async fn call(&self, _args: Value) -> String {
        match self.spawner.active_threads().await {
            Ok(threads) if threads.is_empty() => "No active threads".to_string(),
            Ok(threads) => threads
                .iter()
                .map(|t| {
                    format!(
                        "{} {} [{}] {}",
                        status_glyph(t.status),
                        t.id,
                        t.status,
                        t.name
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("Error: failed to list threads: {e}"),
        }
    }
}
