//! The orchestrator: owns live threads, executors, background tasks, and the
//! WebSocket fan-out.
//!
//! Concurrency contract: at most one bounded agent turn runs at a time per
//! thread (the `generating` set is checked-and-inserted under a write lock);
//! turns on different threads run fully concurrently against their own
//! worktrees. Trunk is only touched by accept merges, which the wiki store
//! serializes.

pub mod events;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agent::loop_control::{LoopController, LoopLimits, StopReason, ToolCall};
use crate::agent::{ConversationExecutor, TurnStatus};
use crate::signals::{self, ApprovalSignal, SlashCommand};
use crate::storage::Storage;
use crate::threads::lifecycle::{self, AcceptOutcome};
use crate::threads::model::{
    new_thread_id, MessageRole, Thread, ThreadKind, ThreadStatus,
};
use crate::threads::branch::branch_name_for;
use crate::tools::{build_toolset, ToolContext, ToolSet, WorkerSpawner};
use crate::wiki::WikiStore;

pub use events::{ClientRegistry, ConnId, WsEvent};

/// Builds a fresh executor for a thread. Injected so tests (and the default
/// binary wiring) can supply scripted executors.
pub type ExecutorFactory =
    Box<dyn Fn(&Thread) -> Arc<dyn ConversationExecutor> + Send + Sync>;

/// Tool names that mutate pages; used for edit accounting and page-updated
/// broadcasts.
const WRITE_TOOLS: [&str; 4] = ["write_page", "edit_page", "insert_lines", "move_page"];

pub struct ThreadManager {
    me: Weak<Self>,
    storage: Arc<Storage>,
    wiki: Arc<WikiStore>,
    registry: Arc<ClientRegistry>,
    executors: RwLock<HashMap<String, Arc<dyn ConversationExecutor>>>,
    /// Background run tasks, keyed by thread id, cancelled as a unit on cleanup.
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    /// Threads with a bounded turn currently in flight.
    generating: RwLock<HashSet<String>>,
    executor_factory: ExecutorFactory,
    limits: LoopLimits,
    /// Distinct approving users required to accept from chat signals.
    approval_quorum: usize,
}

impl ThreadManager {
    pub fn new(
        storage: Arc<Storage>,
        wiki: Arc<WikiStore>,
        registry: Arc<ClientRegistry>,
        limits: LoopLimits,
        approval_quorum: usize,
        executor_factory: ExecutorFactory,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            storage,
            wiki,
            registry,
            executors: RwLock::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            generating: RwLock::new(HashSet::new()),
            executor_factory,
            limits,
            approval_quorum: approval_quorum.max(1),
        })
    }

    fn arc(&self) -> Result<Arc<Self>> {
        self.me
            .upgrade()
            .context("thread manager is shutting down")
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Re-register worker threads that survived a restart: any live worker
    /// with a recorded worktree gets the worktree recreated if the directory
    /// is gone (the repo itself is durable; worktrees may live on tmpfs).
    pub async fn recover_on_startup(&self) -> Result<()> {
        let threads = self.storage.list_live_worker_threads().await?;
        for thread in threads {
            let Some(branch) = thread.branch.as_deref() else {
                continue;
            };
            let expected = self.wiki.worktree_path_for(branch);
            if !expected.exists() {
                match self.wiki.create_worktree(branch).await {
                    Ok(path) => {
                        self.storage
                            .set_thread_worktree(&thread.id, Some(&path.to_string_lossy()))
                            .await?;
                        info!(thread_id = %thread.id, branch, "worktree recreated on startup");
                    }
                    Err(e) => {
                        warn!(thread_id = %thread.id, branch, err = %e, "failed to recover worktree");
                        self.storage
                            .set_thread_error(&thread.id, Some(&format!("worktree lost: {e}")))
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    // ─── Connection lifecycle ────────────────────────────────────────────────

    /// First request on a new connection: validate/create the user, find or
    /// create their single active assistant thread, put it in view, and send
    /// the history plus the global thread list.
    pub async fn connect(&self, conn: ConnId, user_id: &str, user_name: &str) -> Result<()> {
        let user = self.storage.get_or_create_user(user_id, user_name).await?;

        let assistant = match self.storage.find_active_assistant(&user.id).await? {
            Some(t) => t,
            None => {
                let id = new_thread_id();
                self.storage
                    .create_thread(
                        &id,
                        &format!("{}'s assistant", user.name),
                        &user.id,
                        ThreadKind::Assistant,
                        ThreadStatus::Active,
                        None,
                        None,
                    )
                    .await?
            }
        };
        self.ensure_executor(&assistant).await?;

        self.registry
            .set_viewing(conn, Some(assistant.id.clone()))
            .await;
        self.send_thread_view(conn, &assistant).await?;
        self.registry
            .send(conn, self.thread_list_event().await?)
            .await;
        info!(conn, user_id, thread_id = %assistant.id, "client connected");
        Ok(())
    }

    /// Drop the connection mapping. Threads outlive connections — several
    /// clients may collaborate on one thread.
    pub async fn disconnect(&self, conn: ConnId) {
        self.registry.unregister(conn).await;
    }

    pub async fn select_thread(&self, conn: ConnId, thread_id: &str) -> Result<()> {
        let Some(thread) = self.storage.get_thread(thread_id).await? else {
            self.registry
                .send(
                    conn,
                    WsEvent::Error {
                        message: format!("thread '{thread_id}' not found"),
                    },
                )
                .await;
            return Ok(());
        };
        self.registry
            .set_viewing(conn, Some(thread.id.clone()))
            .await;
        self.send_thread_view(conn, &thread).await
    }

    async fn send_thread_view(&self, conn: ConnId, thread: &Thread) -> Result<()> {
        let messages = self.storage.list_messages(&thread.id, 200).await?;
        let is_generating = self.generating.read().await.contains(&thread.id);
        self.registry
            .send(
                conn,
                WsEvent::ThreadSelected {
                    thread: thread.clone(),
                    messages,
                    is_generating,
                },
            )
            .await;
        Ok(())
    }

    // ─── Message routing ─────────────────────────────────────────────────────

    /// Route one chat message from a connection to the thread it has in view.
    pub async fn handle_chat_message(&self, conn: ConnId, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            self.send_error(conn, "message is empty").await;
            return Ok(());
        }
        let Some(thread_id) = self.registry.viewing(conn).await else {
            self.send_error(conn, "no thread selected").await;
            return Ok(());
        };
        let Some(thread) = self.storage.get_thread(&thread_id).await? else {
            self.send_error(conn, "selected thread no longer exists").await;
            return Ok(());
        };
        if thread.status.is_terminal() {
            self.send_error(
                conn,
                &format!("thread is {} and no longer accepts messages", thread.status),
            )
            .await;
            return Ok(());
        }
        let user_id = self.registry.user_of(conn).await;

        if let Some(command) = signals::parse_command(text) {
            return self.handle_command(conn, &thread, command).await;
        }

        // Review-state approval signals accept/reject without waking the agent.
        if thread.status == ThreadStatus::Review {
            if let Some(signal) = signals::classify_approval(text) {
                return self
                    .handle_review_signal(conn, &thread, text, user_id.as_deref(), signal)
                    .await;
            }
        }

        // A turn already in flight refuses new input before anything is
        // persisted: the transcript never holds a message no turn consumes.
        if self.generating.read().await.contains(&thread.id) {
            self.send_error(conn, "agent is already responding on this thread")
                .await;
            return Ok(());
        }

        // Ordinary chat resumes a waiting thread.
        if matches!(thread.status, ThreadStatus::NeedHelp | ThreadStatus::Review) {
            self.storage
                .update_thread_status(&thread.id, ThreadStatus::Working)
                .await?;
            self.broadcast_status(&thread.id, ThreadStatus::Working, None)
                .await;
        }

        let message = self
            .storage
            .append_message(
                &thread.id,
                MessageRole::User,
                text,
                None,
                None,
                None,
                user_id.as_deref(),
            )
            .await?;
        self.registry
            .broadcast_to_thread_viewers(
                &thread.id,
                WsEvent::ThreadMessage {
                    thread_id: thread.id.clone(),
                    message,
                },
            )
            .await;

        // @mentions notify the named users wherever they are connected.
        let sender = user_id.unwrap_or_else(|| "anonymous".to_string());
        for name in signals::parse_mentions(text) {
            self.registry
                .send_to_user(
                    &name,
                    WsEvent::Mention {
                        thread_id: thread.id.clone(),
                        from: sender.clone(),
                        text: text.to_string(),
                    },
                )
                .await;
        }

        // The turn runs in a tracked background task so the connection's
        // frame loop keeps pumping events while the agent works.
        self.spawn_run(&thread.id, text.to_string()).await
    }

    async fn handle_command(
        &self,
        conn: ConnId,
        thread: &Thread,
        command: SlashCommand,
    ) -> Result<()> {
        match command {
            SlashCommand::Accept => {
                self.accept_thread(&thread.id).await?;
            }
            SlashCommand::Reject => {
                self.reject_thread(&thread.id).await?;
            }
            SlashCommand::Status => {
                self.registry
                    .send(
                        conn,
                        WsEvent::Success {
                            message: format!(
                                "{} [{}/{}]{}",
                                thread.name,
                                thread.kind,
                                thread.status,
                                thread
                                    .review_summary
                                    .as_deref()
                                    .map(|s| format!(" — review: {s}"))
                                    .unwrap_or_default()
                            ),
                        },
                    )
                    .await;
            }
            SlashCommand::Help => {
                self.registry
                    .send(
                        conn,
                        WsEvent::Success {
                            message: "Commands: /accept, /reject, /status, /rename <name>, /help"
                                .to_string(),
                        },
                    )
                    .await;
            }
            SlashCommand::Rename(name) => {
                self.storage.set_thread_name(&thread.id, &name).await?;
                self.registry.broadcast(self.thread_list_event().await?).await;
            }
        }
        Ok(())
    }

    /// Count approval signals gathered while the thread sat in `Review`.
    /// Ordinary chat would have resumed the thread, so every trailing user
    /// message in the log is a signal message.
    async fn handle_review_signal(
        &self,
        conn: ConnId,
        thread: &Thread,
        text: &str,
        user_id: Option<&str>,
        signal: ApprovalSignal,
    ) -> Result<()> {
        // Both outcomes keep the reviewer's message: a rejection's stated
        // reason belongs in the transcript as much as an approval does.
        self.storage
            .append_message(&thread.id, MessageRole::User, text, None, None, None, user_id)
            .await?;

        if signal == ApprovalSignal::Reject {
            self.reject_thread(&thread.id).await?;
            return Ok(());
        }

        let recent = self.storage.list_messages(&thread.id, 50).await?;
        let mut votes: Vec<(String, ApprovalSignal)> = Vec::new();
        for m in recent.iter().rev() {
            if m.role != MessageRole::User {
                break;
            }
            match signals::classify_approval(&m.content) {
                Some(s) => votes.push((m.user_id.clone().unwrap_or_default(), s)),
                None => break,
            }
        }

        if signals::has_consensus(&votes, self.approval_quorum) {
            self.accept_thread(&thread.id).await?;
        } else {
            let approvers: HashSet<&str> = votes
                .iter()
                .filter(|(_, s)| *s == ApprovalSignal::Approve)
                .map(|(u, _)| u.as_str())
                .collect();
            self.registry
                .send(
                    conn,
                    WsEvent::Success {
                        message: format!(
                            "approval recorded ({}/{})",
                            approvers.len(),
                            self.approval_quorum
                        ),
                    },
                )
                .await;
        }
        Ok(())
    }

    // ─── Bounded agent execution ─────────────────────────────────────────────

    /// Run the agent on a thread until the loop controller or the thread's
    /// own post-turn policy stops it. No-op if a turn is already in flight.
    async fn run_agent(&self, thread_id: &str, initial_prompt: String) {
        {
            let mut generating = self.generating.write().await;
            if !generating.insert(thread_id.to_string()) {
                debug!(thread_id, "turn already in flight, skipping");
                return;
            }
        }
        self.registry
            .broadcast_to_thread_viewers(
                thread_id,
                WsEvent::AgentStart {
                    thread_id: thread_id.to_string(),
                },
            )
            .await;

        let stop_reason = match self.agent_loop(thread_id, initial_prompt).await {
            Ok(reason) => reason,
            Err(e) => {
                error!(thread_id, err = %e, "agent run failed");
                self.record_agent_failure(thread_id, &e.to_string()).await;
                StopReason::NaturalCompletion
            }
        };

        self.generating.write().await.remove(thread_id);
        self.registry
            .broadcast_to_thread_viewers(
                thread_id,
                WsEvent::AgentComplete {
                    thread_id: thread_id.to_string(),
                    stop_reason: stop_reason.as_str().to_string(),
                },
            )
            .await;
    }

    async fn agent_loop(&self, thread_id: &str, initial_prompt: String) -> Result<StopReason> {
        let mut controller = LoopController::new(self.limits);
        let mut prompt = initial_prompt;
        let mut iteration: u32 = 0;

        loop {
            iteration += 1;

            // Reload every iteration: lifecycle tools may have moved the
            // thread, and the toolset binds to the current worktree.
            let thread = self
                .storage
                .get_thread(thread_id)
                .await?
                .context("thread vanished mid-run")?;
            if thread.status.is_terminal() {
                return Ok(StopReason::NaturalCompletion);
            }

            let executor = self.ensure_executor(&thread).await?;
            let tools = self.toolset_for(&thread)?;
            let outcome = executor.process_turn(&prompt, &tools).await;

            if outcome.status == TurnStatus::Error {
                let message = outcome
                    .error
                    .unwrap_or_else(|| "executor failed".to_string());
                self.record_agent_failure(thread_id, &message).await;
                return Ok(StopReason::NaturalCompletion);
            }

            self.log_turn(&thread, &outcome.final_response, &outcome.tool_calls, &mut controller)
                .await?;

            let calls: Vec<ToolCall> = outcome
                .tool_calls
                .iter()
                .map(|r| ToolCall {
                    name: r.name.clone(),
                    args: r.args.clone(),
                })
                .collect();
            let (cont, reason) =
                controller.should_continue(iteration, &calls, &outcome.final_response);
            if !cont {
                debug!(thread_id, reason = reason.as_str(), stats = ?controller.stats(), "run stopped");
                return Ok(reason);
            }

            // The thread's post-turn policy decides whether to keep going.
            let status = self
                .storage
                .get_thread(thread_id)
                .await?
                .map(|t| t.status)
                .unwrap_or(ThreadStatus::Archived);
            match thread.kind.post_turn_prompt(status) {
                Some(next) => prompt = next.to_string(),
                None => return Ok(StopReason::NaturalCompletion),
            }
        }
    }

    /// Persist and broadcast one turn's output, feeding loop accounting.
    async fn log_turn(
        &self,
        thread: &Thread,
        response: &str,
        tool_calls: &[crate::agent::ToolCallRecord],
        controller: &mut LoopController,
    ) -> Result<()> {
        for record in tool_calls {
            let message = self
                .storage
                .append_message(
                    &thread.id,
                    MessageRole::ToolCall,
                    &format!("called {}", record.name),
                    Some(&record.name),
                    Some(&record.args),
                    Some(&record.result),
                    None,
                )
                .await?;
            self.registry
                .broadcast_to_thread_viewers(
                    &thread.id,
                    WsEvent::ThreadMessage {
                        thread_id: thread.id.clone(),
                        message,
                    },
                )
                .await;

            let succeeded = !record.result.starts_with("Error:");
            let path = record
                .args
                .get("path")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if record.name == "read_page" && !path.is_empty() {
                controller.record_page_analyzed(path);
            }
            if WRITE_TOOLS.contains(&record.name.as_str()) && succeeded {
                controller.record_change();
                if !path.is_empty() {
                    self.registry
                        .broadcast_to_thread_viewers(
                            &thread.id,
                            WsEvent::PageUpdated {
                                thread_id: thread.id.clone(),
                                path: path.to_string(),
                            },
                        )
                        .await;
                }
            }
        }

        if !response.trim().is_empty() {
            let message = self
                .storage
                .append_message(
                    &thread.id,
                    MessageRole::Assistant,
                    response,
                    None,
                    None,
                    None,
                    None,
                )
                .await?;
            self.registry
                .broadcast_to_thread_viewers(
                    &thread.id,
                    WsEvent::ThreadMessage {
                        thread_id: thread.id.clone(),
                        message,
                    },
                )
                .await;
        }
        Ok(())
    }

    /// Agent/tool failure at the turn boundary: record the error, park the
    /// thread in NeedHelp for a human, tell the viewers. Never crashes the
    /// orchestrator.
    async fn record_agent_failure(&self, thread_id: &str, message: &str) {
        if let Err(e) = self.storage.set_thread_error(thread_id, Some(message)).await {
            error!(thread_id, err = %e, "failed to record agent error");
        }
        let status = match self.storage.get_thread(thread_id).await {
            Ok(Some(t)) if t.status.can_transition(ThreadStatus::NeedHelp) => {
                if let Err(e) = self
                    .storage
                    .update_thread_status(thread_id, ThreadStatus::NeedHelp)
                    .await
                {
                    error!(thread_id, err = %e, "failed to park thread in need_help");
                }
                ThreadStatus::NeedHelp
            }
            Ok(Some(t)) => t.status,
            _ => return,
        };
        self.registry
            .broadcast_to_thread_viewers(
                thread_id,
                WsEvent::ThreadStatus {
                    thread_id: thread_id.to_string(),
                    status,
                    review_summary: None,
                    error: Some(message.to_string()),
                },
            )
            .await;
    }

    fn toolset_for(&self, thread: &Thread) -> Result<ToolSet> {
        // Workers operate strictly inside their own worktree.
        let root = match thread.kind {
            ThreadKind::Worker => thread
                .worktree_path
                .clone()
                .context("worker thread has no worktree")?,
            ThreadKind::Assistant => self.wiki.trunk_dir().to_path_buf(),
        };
        let spawner: Option<Arc<dyn WorkerSpawner>> = match thread.kind {
            ThreadKind::Assistant => Some(self.arc()? as Arc<dyn WorkerSpawner>),
            ThreadKind::Worker => None,
        };
        Ok(build_toolset(&ToolContext {
            storage: self.storage.clone(),
            wiki: self.wiki.clone(),
            registry: self.registry.clone(),
            thread: thread.clone(),
            root,
            spawner,
        }))
    }

    async fn ensure_executor(&self, thread: &Thread) -> Result<Arc<dyn ConversationExecutor>> {
        if let Some(existing) = self.executors.read().await.get(&thread.id) {
            return Ok(existing.clone());
        }
        let executor = (self.executor_factory)(thread);
        executor.start_session(&system_prompt_for(thread)).await?;
        self.executors
            .write()
            .await
            .insert(thread.id.clone(), executor.clone());
        Ok(executor)
    }

    // ─── Accept / reject / teardown ──────────────────────────────────────────

    /// Accept a worker thread: merge its branch into trunk, or start the
    /// automated conflict-resolution flow.
    pub async fn accept_thread(&self, thread_id: &str) -> Result<AcceptOutcome> {
        let thread = self
            .storage
            .get_thread(thread_id)
            .await?
            .context("thread not found")?;

        let outcome = lifecycle::accept(&self.storage, &self.wiki, &thread).await?;
        match &outcome {
            AcceptOutcome::Merged => {
                self.teardown_runtime(thread_id).await;
                self.broadcast_status(thread_id, ThreadStatus::Accepted, None)
                    .await;
                self.registry.broadcast(self.thread_list_event().await?).await;
                self.registry.broadcast(WsEvent::PagesChanged).await;
                self.registry
                    .broadcast_to_thread_viewers(
                        thread_id,
                        WsEvent::Success {
                            message: format!("'{}' merged into the wiki", thread.name),
                        },
                    )
                    .await;
            }
            AcceptOutcome::Conflict { message } => {
                self.registry
                    .broadcast_to_thread_viewers(
                        thread_id,
                        WsEvent::AcceptConflict {
                            thread_id: thread_id.to_string(),
                            message: message.clone(),
                        },
                    )
                    .await;
                lifecycle::begin_conflict_resolution(&self.storage, &self.wiki, &thread, message)
                    .await?;
                self.broadcast_status(thread_id, ThreadStatus::Working, None)
                    .await;
                // The same bounded loop that does ordinary work resolves the
                // markers; run it in a tracked background task.
                self.spawn_run(
                    thread_id,
                    "Resolve the merge conflicts in your worktree, then call \
                     mark_for_review again."
                        .to_string(),
                )
                .await?;
            }
            AcceptOutcome::Error { message } => {
                self.registry
                    .broadcast_to_thread_viewers(
                        thread_id,
                        WsEvent::Error {
                            message: message.clone(),
                        },
                    )
                    .await;
            }
        }
        Ok(outcome)
    }

    pub async fn reject_thread(&self, thread_id: &str) -> Result<bool> {
        let thread = self
            .storage
            .get_thread(thread_id)
            .await?
            .context("thread not found")?;
        let rejected = lifecycle::reject(&self.storage, &self.wiki, &thread).await?;
        if rejected {
            self.teardown_runtime(thread_id).await;
            self.broadcast_status(thread_id, ThreadStatus::Rejected, None)
                .await;
            self.registry.broadcast(self.thread_list_event().await?).await;
        }
        Ok(rejected)
    }

    /// Archive an assistant thread; the next connect creates a fresh one.
    pub async fn archive_thread(&self, thread_id: &str) -> Result<()> {
        let thread = self
            .storage
            .get_thread(thread_id)
            .await?
            .context("thread not found")?;
        if !thread.status.can_transition(ThreadStatus::Archived) {
            anyhow::bail!("cannot archive thread in status '{}'", thread.status);
        }
        self.storage
            .update_thread_status(thread_id, ThreadStatus::Archived)
            .await?;
        self.teardown_runtime(thread_id).await;
        self.registry.broadcast(self.thread_list_event().await?).await;
        Ok(())
    }

    /// Release a thread's runtime footprint: background task, executor,
    /// generating flag, worktree. Idempotent — repeated calls are no-ops.
    pub async fn cleanup_thread(&self, thread_id: &str) -> Result<()> {
        self.teardown_runtime(thread_id).await;
        if let Some(thread) = self.storage.get_thread(thread_id).await? {
            lifecycle::release_worktree(&self.storage, &self.wiki, &thread).await;
        }
        Ok(())
    }

    /// Delete a thread entirely: runtime, worktree, branch, rows.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.teardown_runtime(thread_id).await;
        if let Some(thread) = self.storage.get_thread(thread_id).await? {
            lifecycle::teardown_git(&self.storage, &self.wiki, &thread).await;
        }
        self.storage.delete_thread(thread_id).await?;
        self.registry.broadcast(self.thread_list_event().await?).await;
        info!(thread_id, "thread deleted");
        Ok(())
    }

    async fn teardown_runtime(&self, thread_id: &str) {
        if let Some(task) = self.tasks.lock().await.remove(thread_id) {
            task.abort();
        }
        self.executors.write().await.remove(thread_id);
        self.generating.write().await.remove(thread_id);
    }

    // ─── Helpers ─────────────────────────────────────────────────────────────

    /// Launch a bounded run in a background task tracked by thread id.
    async fn spawn_run(&self, thread_id: &str, prompt: String) -> Result<()> {
        let manager = self.arc()?;
        let id = thread_id.to_string();
        let handle = tokio::spawn(async move {
            manager.run_agent(&id, prompt).await;
        });
        if let Some(previous) = self.tasks.lock().await.insert(thread_id.to_string(), handle) {
            previous.abort();
        }
        Ok(())
    }

    /// Wait for a thread's background run to finish. Test hook; a missing or
    /// cancelled task is not an error.
    pub async fn wait_for_run(&self, thread_id: &str) {
        let handle = self.tasks.lock().await.remove(thread_id);
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub async fn list_threads(&self) -> Result<Vec<Thread>> {
        self.storage.list_threads().await
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>> {
        self.storage.get_thread(thread_id).await
    }

    pub async fn list_thread_messages(
        &self,
        thread_id: &str,
        limit: i64,
    ) -> Result<Vec<crate::threads::model::Message>> {
        self.storage.list_messages(thread_id, limit).await
    }

    pub async fn is_generating(&self, thread_id: &str) -> bool {
        self.generating.read().await.contains(thread_id)
    }

    async fn thread_list_event(&self) -> Result<WsEvent> {
        Ok(WsEvent::ThreadList {
            threads: self.storage.list_threads().await?,
        })
    }

    async fn broadcast_status(
        &self,
        thread_id: &str,
        status: ThreadStatus,
        review_summary: Option<String>,
    ) {
        self.registry
            .broadcast_to_thread_viewers(
                thread_id,
                WsEvent::ThreadStatus {
                    thread_id: thread_id.to_string(),
                    status,
                    review_summary,
                    error: None,
                },
            )
            .await;
    }

    async fn send_error(&self, conn: ConnId, message: &str) {
        self.registry
            .send(
                conn,
                WsEvent::Error {
                    message: message.to_string(),
                },
            )
            .await;
    }
}

#[async_trait]
impl WorkerSpawner for ThreadManager {
    /// Create a worker: persist the row, carve out branch + worktree, then
    /// run the fixed goal message in a tracked background task.
    async fn spawn_worker(&self, owner_id: &str, name: &str, goal: &str) -> Result<Thread> {
        let id = new_thread_id();
        let branch = branch_name_for(name);
        self.storage
            .create_thread(
                &id,
                name,
                owner_id,
                ThreadKind::Worker,
                ThreadStatus::Working,
                Some(goal),
                Some(&branch),
            )
            .await?;

        // Branch init failure leaves the thread in place, marked with the
        // error and without a worktree; it never runs.
        let init = async {
            self.wiki.create_branch(&branch).await?;
            self.wiki.create_worktree(&branch).await
        };
        match init.await {
            Ok(path) => {
                self.storage
                    .set_thread_worktree(&id, Some(&path.to_string_lossy()))
                    .await?;
            }
            Err(e) => {
                warn!(thread_id = %id, branch, err = %e, "branch initialization failed");
                self.storage
                    .set_thread_error(&id, Some(&format!("branch initialization failed: {e}")))
                    .await?;
            }
        }

        let thread = self
            .storage
            .get_thread(&id)
            .await?
            .context("thread not found after insert")?;

        self.registry
            .broadcast(WsEvent::ThreadCreated {
                thread: thread.clone(),
            })
            .await;
        self.registry.broadcast(self.thread_list_event().await?).await;

        if thread.worktree_path.is_some() {
            self.ensure_executor(&thread).await?;
            if let Some(initial) = thread.kind.initial_message(thread.goal.as_deref()) {
                self.storage
                    .append_message(&id, MessageRole::System, &initial, None, None, None, None)
                    .await?;
                self.spawn_run(&id, initial).await?;
            }
        }
        info!(thread_id = %id, branch = %branch, name, "worker spawned");
        Ok(thread)
    }

    async fn active_threads(&self) -> Result<Vec<Thread>> {
        let all = self.storage.list_threads().await?;
        Ok(all.into_iter().filter(|t| !t.status.is_terminal()).collect())
    }
}

/// System prompt handed to a fresh executor session.
fn system_prompt_for(thread: &Thread) -> String {
    match thread.kind {
        ThreadKind::Assistant => format!(
            "You are the wiki assistant for {}. You can read and search pages, \
             list threads, and spawn worker threads to make edits. You cannot \
             edit pages yourself.",
            thread.owner_id
        ),
        ThreadKind::Worker => format!(
            "You are a worker agent editing a git-backed wiki on your own \
             branch. Goal: {}. Use the page tools to do the work, then call \
             mark_for_review with a short summary.",
            thread.goal.as_deref().unwrap_or("(none)")
        ),
    }
}
