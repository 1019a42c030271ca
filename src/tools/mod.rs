//! Capability-scoped tool sets.
//!
//! A thread's kind fixes its capability tags at creation; `build_toolset`
//! turns those tags plus the required handles into the concrete tool list.
//! Handlers validate their own arguments and always return a string — a bad
//! call yields a descriptive error the model can read and correct, never a
//! panic across the orchestration boundary.

pub mod analysis;
pub mod lifecycle;
pub mod read;
pub mod spawn;
pub mod write;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::manager::events::ClientRegistry;
use crate::storage::Storage;
use crate::threads::model::Thread;
use crate::wiki::WikiStore;

pub use spawn::WorkerSpawner;

/// Capability tags a thread kind grants. Explicit composition — a tool set
/// is built from these tags, never from the thread's runtime shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Read,
    Write,
    Spawn,
    Lifecycle,
    ThreadAnalysis,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Run the tool. Argument problems come back as error strings.
    async fn call(&self, args: Value) -> String;
}

/// The concrete tool list handed to an executor for one turn.
#[derive(Clone, Default)]
pub struct ToolSet {
    handlers: Vec<Arc<dyn ToolHandler>>,
}

impl ToolSet {
    pub fn new(handlers: Vec<Arc<dyn ToolHandler>>) -> Self {
        Self { handlers }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.iter().any(|h| h.name() == name)
    }

    /// Invoke by name. Out-of-capability names are an error string, not a
    /// panic — capability isolation is enforced here, not by prompt text.
    pub async fn invoke(&self, name: &str, args: Value) -> String {
        let Some(handler) = self.handlers.iter().find(|h| h.name() == name) else {
            return format!("Error: unknown tool '{name}'");
        };
        debug!(tool = name, "invoking tool");
        handler.call(args).await
    }
}

/// Everything a tool set needs, bound to one thread.
///
/// `root` is the directory page tools operate in: the thread's own worktree
/// for workers, the trunk checkout for assistants. Worker tools never touch
/// the trunk directly.
pub struct ToolContext {
    pub storage: Arc<Storage>,
    pub wiki: Arc<WikiStore>,
    pub registry: Arc<ClientRegistry>,
    pub thread: Thread,
    pub root: PathBuf,
    /// Present only when the Spawn capability is granted.
    pub spawner: Option<Arc<dyn WorkerSpawner>>,
}

/// Build the tool set for a thread from its capability tags.
pub fn build_toolset(ctx: &ToolContext) -> ToolSet {
    let mut handlers: Vec<Arc<dyn ToolHandler>> = Vec::new();
    for cap in ctx.thread.kind.capabilities() {
        match cap {
            Capability::Read => read::install(ctx, &mut handlers),
            Capability::Write => write::install(ctx, &mut handlers),
            Capability::Spawn => spawn::install(ctx, &mut handlers),
            Capability::Lifecycle => lifecycle::install(ctx, &mut handlers),
            Capability::ThreadAnalysis => analysis::install(ctx, &mut handlers),
        }
    }
    ToolSet::new(handlers)
}

// ─── Argument helpers shared by the handler modules ──────────────────────────

pub(crate) fn req_str(args: &Value, key: &str) -> Result<String, String> {
    match args.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(format!("Error: missing required argument '{key}'")),
    }
}

pub(crate) fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty())
}

pub(crate) fn opt_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}
