//! Thread-analysis capability, granted to both kinds: cross-thread listing,
//! history reads, message search, and branch-vs-trunk diff stats.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::storage::Storage;
use crate::threads::model::{ThreadKind, ThreadStatus};
use crate::wiki::WikiStore;

use super::{opt_str, opt_u64, req_str, ToolContext, ToolHandler};

const MESSAGE_LIMIT: i64 = 50;

pub fn install(ctx: &ToolContext, handlers: &mut Vec<Arc<dyn ToolHandler>>) {
    handlers.push(Arc::new(ListThreads {
        storage: ctx.storage.clone(),
    }));
    handlers.push(Arc::new(ReadThreadMessages {
        storage: ctx.storage.clone(),
    }));
    handlers.push(Arc::new(SearchThreadMessages {
        storage: ctx.storage.clone(),
    }));
    handlers.push(Arc::new(ThreadDiffStat {
        storage: ctx.storage.clone(),
        wiki: ctx.wiki.clone(),
    }));
}

struct ListThreads {
    storage: Arc<Storage>,
}

#[async_trait]
impl ToolHandler for ListThreads {
    fn name(&self) -> &'static str {
        "list_threads"
    }

    fn description(&self) -> &'static str {
        "List threads, optionally filtered. Args: {kind?, status?}"
    }

    async fn call(&self, args: Value) -> String {
        let kind = match opt_str(&args, "kind") {
            Some(raw) => match ThreadKind::parse(&raw) {
                Some(k) => Some(k),
                None => return format!("Error: unknown thread kind '{raw}'"),
            },
            None => None,
        };
        let status = match opt_str(&args, "status") {
            Some(raw) => match ThreadStatus::parse(&raw) {
                Some(s) => Some(s),
                None => return format!("Error: unknown status '{raw}'"),
            },
            None => None,
        };
        match self.storage.list_threads_filtered(kind, status).await {
            Ok(threads) if threads.is_empty() => "No matching threads".to_string(),
            Ok(threads) => threads
                .iter()
                .map(|t| {
                    format!(
                        "{} [{}/{}] {}{}",
                        t.id,
                        t.kind,
                        t.status,
                        t.name,
                        t.goal
                            .as_deref()
                            .map(|g| format!(" — goal: {g}"))
                            .unwrap_or_default()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("Error: failed to list threads: {e}"),
        }
    }
}

struct ReadThreadMessages {
    storage: Arc<Storage>,
}

#[async_trait]
impl ToolHandler for ReadThreadMessages {
    fn name(&self) -> &'static str {
        "read_thread_messages"
    }

    fn description(&self) -> &'static str {
        "Read a thread's conversation history. Args: {thread_id, limit?}"
    }

    async fn call(&self, args: Value) -> String {
        let thread_id = match req_str(&args, "thread_id") {
            Ok(id) => id,
            Err(e) => return e,
        };
        let limit = opt_u64(&args, "limit").unwrap_or(MESSAGE_LIMIT as u64) as i64;
        match self.storage.list_messages(&thread_id, limit).await {
            Ok(messages) if messages.is_empty() => {
                format!("No messages in thread {thread_id}")
            }
            Ok(messages) => messages
                .iter()
                .map(|m| format!("[{}] {}", m.role.as_str(), m.content))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("Error: failed to read messages: {e}"),
        }
    }
}

struct SearchThreadMessages {
    storage: Arc<Storage>,
}

#[async_trait]
impl ToolHandler for SearchThreadMessages {
    fn name(&self) -> &'static str {
        "search_thread_messages"
    }

    fn description(&self) -> &'static str {
        "Full-text search across all thread messages. Args: {query, limit?}"
    }

    async fn call(&self, args: Value) -> String {
        let query = match req_str(&args, "query") {
            Ok(q) => q,
            Err(e) => return e,
        };
        let limit = opt_u64(&args, "limit").unwrap_or(20) as i64;
        match self.storage.search_messages(&query, limit).await {
            Ok(messages) if messages.is_empty() => format!("No messages match '{query}'"),
            Ok(messages) => messages
                .iter()
                .map(|m| format!("{} [{}] {}", m.thread_id, m.role.as_str(), m.content))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("Error: search failed: {e}"),
        }
    }
}

struct ThreadDiffStat {
    storage: Arc<Storage>,
    wiki: Arc<WikiStore>,
}

#[async_trait]
impl ToolHandler for ThreadDiffStat {
    fn name(&self) -> &'static str {
        "thread_diff_stat"
    }

    fn description(&self) -> &'static str {
        "Diff statistics for a worker thread's branch vs. trunk. Args: {thread_id}"
    }

    async fn call(&self, args: Value) -> String {
        let thread_id = match req_str(&args, "thread_id") {
            Ok(id) => id,
            Err(e) => return e,
        };
        let thread = match self.storage.get_thread(&thread_id).await {
            Ok(Some(t)) => t,
            Ok(None) => return format!("Error: thread '{thread_id}' not found"),
            Err(e) => return format!("Error: failed to load thread: {e}"),
        };
        let Some(branch) = thread.branch.as_deref() else {
            return format!("Error: thread '{thread_id}' has no branch");
        };
        match self.wiki.diff_stat(self.wiki.trunk(), branch).await {
            Ok(stat) => format!(
                "{} files changed, +{} -{}\n{}",
                stat.files_changed, stat.insertions, stat.deletions, stat.summary
            ),
            Err(e) => format!("Error: diff failed: {e}"),
        }
    }
}
