//! End-to-end orchestration tests driven by scripted executors.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{oneshot, Mutex};

use common::{harness, harness_with_factory, harness_with_quorum};
use loomd::agent::{ConversationExecutor, ScriptedTurn, TurnOutcome, TurnStatus};
use loomd::manager::{ExecutorFactory, WsEvent};
use loomd::threads::lifecycle::AcceptOutcome;
use loomd::threads::model::{MessageRole, ThreadStatus};
use loomd::tools::{build_toolset, ToolContext, ToolSet, WorkerSpawner};

// ─── Scenario A: spawn → review → accept ─────────────────────────────────────

#[tokio::test]
async fn worker_creates_page_and_accept_merges_to_trunk() {
    let h = harness(vec![vec![ScriptedTurn::say("")
        .call("write_page", json!({"path": "Foo", "content": "Foo page body"}))
        .call("mark_for_review", json!({"summary": "created Foo"}))]])
    .await;

    let thread = h
        .manager
        .spawn_worker("alice", "create foo", "create page Foo")
        .await
        .expect("spawn");
    assert_eq!(thread.status, ThreadStatus::Working);
    assert!(thread.worktree_path.is_some());
    h.manager.wait_for_run(&thread.id).await;

    let reviewed = h
        .storage
        .get_thread(&thread.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(reviewed.status, ThreadStatus::Review);
    assert_eq!(reviewed.review_summary.as_deref(), Some("created Foo"));

    let outcome = h.manager.accept_thread(&thread.id).await.expect("accept");
    assert_eq!(outcome, AcceptOutcome::Merged);

    // Trunk now contains the page.
    let page = h
        .wiki
        .read_page(h.wiki.trunk_dir(), "Foo")
        .await
        .expect("read")
        .expect("page on trunk");
    assert_eq!(page.content, "Foo page body");

    // Worktree is gone; the branch is retained for audit.
    let accepted = h
        .storage
        .get_thread(&thread.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(accepted.status, ThreadStatus::Accepted);
    assert!(accepted.worktree_path.is_none());
    let branch = accepted.branch.expect("branch");
    assert!(!h.wiki.worktree_path_for(&branch).exists());
    let branches = h
        .wiki
        .list_branches_with_prefix("thread/")
        .await
        .expect("list");
    assert!(branches.contains(&branch));
}

// ─── Scenario B: concurrent workers on different pages ───────────────────────

#[tokio::test]
async fn two_workers_merge_without_interference() {
    let script_for = |path: &str| {
        vec![ScriptedTurn::say("")
            .call("write_page", json!({"path": path, "content": format!("{path} content")}))
            .call("mark_for_review", json!({"summary": format!("wrote {path}")}))]
    };
    let h = harness(vec![script_for("Alpha"), script_for("Beta")]).await;

    let t1 = h
        .manager
        .spawn_worker("alice", "alpha page", "write Alpha")
        .await
        .expect("spawn 1");
    let t2 = h
        .manager
        .spawn_worker("bob", "beta page", "write Beta")
        .await
        .expect("spawn 2");
    h.manager.wait_for_run(&t1.id).await;
    h.manager.wait_for_run(&t2.id).await;

    assert_eq!(
        h.manager.accept_thread(&t1.id).await.expect("accept 1"),
        AcceptOutcome::Merged
    );
    assert_eq!(
        h.manager.accept_thread(&t2.id).await.expect("accept 2"),
        AcceptOutcome::Merged
    );

    for path in ["Alpha", "Beta"] {
        assert!(
            h.wiki
                .read_page(h.wiki.trunk_dir(), path)
                .await
                .expect("read")
                .is_some(),
            "trunk missing {path}"
        );
    }
}

// ─── Scenario C: conflict, automated resolution, second accept ───────────────

#[tokio::test]
async fn conflicted_accept_resolves_through_the_agent_loop() {
    let h = harness(vec![vec![
        ScriptedTurn::say("")
            .call("write_page", json!({"path": "Shared", "content": "worker version\n"}))
            .call("mark_for_review", json!({"summary": "edited Shared"})),
        // Second bounded run: resolve the markers and resubmit.
        ScriptedTurn::say("")
            .call("write_page", json!({"path": "Shared", "content": "merged version\n"}))
            .call("mark_for_review", json!({"summary": "resolved conflicts"})),
    ]])
    .await;

    h.wiki
        .write_page(h.wiki.trunk_dir(), "Shared", "base\n")
        .await
        .expect("seed trunk");

    let thread = h
        .manager
        .spawn_worker("alice", "edit shared", "update Shared")
        .await
        .expect("spawn");
    h.manager.wait_for_run(&thread.id).await;
    assert_eq!(
        h.storage.get_thread(&thread.id).await.unwrap().unwrap().status,
        ThreadStatus::Review
    );

    // Trunk diverges on the same page while the thread sits in review.
    h.wiki
        .write_page(h.wiki.trunk_dir(), "Shared", "trunk version\n")
        .await
        .expect("diverge trunk");

    let outcome = h.manager.accept_thread(&thread.id).await.expect("accept");
    assert!(
        matches!(outcome, AcceptOutcome::Conflict { .. }),
        "got {outcome:?}"
    );

    // Conflict resolution left instructions in the log. (The thread went
    // back to Working, but the background run may already be past it.)
    let messages = h
        .storage
        .list_messages(&thread.id, 100)
        .await
        .expect("messages");
    assert!(
        messages
            .iter()
            .any(|m| m.role == MessageRole::System && m.content.contains("conflict")),
        "expected a conflict-resolution system message"
    );

    // The background resolution run was started by accept; let it finish.
    h.manager.wait_for_run(&thread.id).await;
    assert_eq!(
        h.storage.get_thread(&thread.id).await.unwrap().unwrap().status,
        ThreadStatus::Review
    );

    assert_eq!(
        h.manager.accept_thread(&thread.id).await.expect("re-accept"),
        AcceptOutcome::Merged
    );
    let page = h
        .wiki
        .read_page(h.wiki.trunk_dir(), "Shared")
        .await
        .expect("read")
        .expect("page");
    assert_eq!(page.content, "merged version\n");
}

// ─── Scenario D: repetition stops the loop ───────────────────────────────────

#[tokio::test]
async fn repetitive_tool_calls_stop_the_run() {
    let repeat = ScriptedTurn::say("keep searching").call("search_pages", json!({"query": "x"}));
    let h = harness(vec![vec![
        repeat.clone(),
        repeat.clone(),
        repeat.clone(),
        repeat.clone(),
        repeat.clone(),
        repeat,
    ]])
    .await;

    let thread = h
        .manager
        .spawn_worker("alice", "search forever", "look for x")
        .await
        .expect("spawn");
    h.manager.wait_for_run(&thread.id).await;

    // Threshold 3 with a 5-call window: the fourth identical call trips the
    // detector, well before the 6 scripted turns (or max_iterations) run out.
    let messages = h
        .storage
        .list_messages(&thread.id, 100)
        .await
        .expect("messages");
    let tool_calls = messages
        .iter()
        .filter(|m| m.role == MessageRole::ToolCall)
        .count();
    assert_eq!(tool_calls, 4);
    assert_eq!(
        h.storage.get_thread(&thread.id).await.unwrap().unwrap().status,
        ThreadStatus::Working
    );
}

// ─── State machine and cleanup contracts ─────────────────────────────────────

#[tokio::test]
async fn accept_from_working_is_refused_without_side_effects() {
    // Empty script: the worker completes its turn without tool calls and
    // stays in Working.
    let h = harness(vec![vec![]]).await;
    let thread = h
        .manager
        .spawn_worker("alice", "idle", "do nothing")
        .await
        .expect("spawn");
    h.manager.wait_for_run(&thread.id).await;

    let outcome = h.manager.accept_thread(&thread.id).await.expect("accept");
    assert!(matches!(outcome, AcceptOutcome::Error { .. }), "got {outcome:?}");

    let after = h
        .storage
        .get_thread(&thread.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(after.status, ThreadStatus::Working);
    assert!(after.worktree_path.is_some());
}

#[tokio::test]
async fn reject_releases_worktree_and_is_terminal() {
    let h = harness(vec![vec![]]).await;
    let thread = h
        .manager
        .spawn_worker("alice", "doomed", "whatever")
        .await
        .expect("spawn");
    h.manager.wait_for_run(&thread.id).await;

    assert!(h.manager.reject_thread(&thread.id).await.expect("reject"));
    let after = h
        .storage
        .get_thread(&thread.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(after.status, ThreadStatus::Rejected);
    assert!(after.worktree_path.is_none());

    // Rejecting again is a no-op, not an error.
    assert!(!h.manager.reject_thread(&thread.id).await.expect("re-reject"));
}

#[tokio::test]
async fn cleanup_is_idempotent() {
    let h = harness(vec![vec![]]).await;
    let thread = h
        .manager
        .spawn_worker("alice", "cleanup me", "nothing")
        .await
        .expect("spawn");
    h.manager.wait_for_run(&thread.id).await;

    h.manager.cleanup_thread(&thread.id).await.expect("cleanup");
    h.manager
        .cleanup_thread(&thread.id)
        .await
        .expect("repeat cleanup");

    let after = h
        .storage
        .get_thread(&thread.id)
        .await
        .expect("get")
        .expect("row survives cleanup");
    assert!(after.worktree_path.is_none());
    let branch = after.branch.expect("branch");
    assert!(!h.wiki.worktree_path_for(&branch).exists());
}

#[tokio::test]
async fn delete_thread_removes_branch_and_rows() {
    let h = harness(vec![vec![]]).await;
    let thread = h
        .manager
        .spawn_worker("alice", "delete me", "nothing")
        .await
        .expect("spawn");
    h.manager.wait_for_run(&thread.id).await;
    let branch = thread.branch.clone().expect("branch");

    h.manager.delete_thread(&thread.id).await.expect("delete");
    assert!(h.storage.get_thread(&thread.id).await.expect("get").is_none());
    let branches = h
        .wiki
        .list_branches_with_prefix("thread/")
        .await
        .expect("list");
    assert!(!branches.contains(&branch));

    // Deleting again is safe.
    h.manager.delete_thread(&thread.id).await.expect("redelete");
}

// ─── Capability isolation ─────────────────────────────────────────────────────

#[tokio::test]
async fn capability_sets_are_disjoint_by_kind() {
    let h = harness(vec![vec![]]).await;
    let worker = h
        .manager
        .spawn_worker("alice", "caps", "check tools")
        .await
        .expect("spawn");
    h.manager.wait_for_run(&worker.id).await;
    let worker = h
        .storage
        .get_thread(&worker.id)
        .await
        .expect("get")
        .expect("exists");

    let worker_tools = build_toolset(&ToolContext {
        storage: h.storage.clone(),
        wiki: h.wiki.clone(),
        registry: h.registry.clone(),
        root: worker.worktree_path.clone().expect("worktree"),
        thread: worker,
        spawner: None,
    });
    assert!(worker_tools.contains("write_page"));
    assert!(worker_tools.contains("mark_for_review"));
    assert!(!worker_tools.contains("spawn_worker"));
    let result = worker_tools.invoke("spawn_worker", json!({})).await;
    assert!(result.starts_with("Error: unknown tool"), "got {result}");

    let mut assistant = h
        .storage
        .create_thread(
            "th-assist01",
            "assistant",
            "alice",
            loomd::threads::model::ThreadKind::Assistant,
            ThreadStatus::Active,
            None,
            None,
        )
        .await
        .expect("assistant");
    assistant.worktree_path = None;
    let assistant_tools = build_toolset(&ToolContext {
        storage: h.storage.clone(),
        wiki: h.wiki.clone(),
        registry: h.registry.clone(),
        root: h.wiki.trunk_dir().to_path_buf(),
        thread: assistant,
        spawner: Some(h.manager.clone() as std::sync::Arc<dyn WorkerSpawner>),
    });
    assert!(assistant_tools.contains("read_page"));
    assert!(assistant_tools.contains("spawn_worker"));
    assert!(!assistant_tools.contains("write_page"));
    assert!(!assistant_tools.contains("mark_for_review"));
    let result = assistant_tools
        .invoke("write_page", json!({"path": "X", "content": "y"}))
        .await;
    assert!(result.starts_with("Error: unknown tool"), "got {result}");
}

// ─── Connection and chat routing ──────────────────────────────────────────────

#[tokio::test]
async fn connect_creates_one_assistant_per_user() {
    let h = harness(vec![vec![], vec![]]).await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let conn = h.registry.register("alice", tx).await;

    h.manager.connect(conn, "alice", "Alice").await.expect("connect");
    let first = rx.recv().await.expect("event");
    let selected_id = match first {
        WsEvent::ThreadSelected { ref thread, .. } => thread.id.clone(),
        other => panic!("expected thread_selected, got {other:?}"),
    };
    assert!(matches!(rx.recv().await, Some(WsEvent::ThreadList { .. })));

    // Reconnecting finds the same assistant instead of creating another.
    let (tx2, mut rx2) = tokio::sync::mpsc::unbounded_channel();
    let conn2 = h.registry.register("alice", tx2).await;
    h.manager.connect(conn2, "alice", "Alice").await.expect("reconnect");
    match rx2.recv().await.expect("event") {
        WsEvent::ThreadSelected { thread, .. } => assert_eq!(thread.id, selected_id),
        other => panic!("expected thread_selected, got {other:?}"),
    }
}

#[tokio::test]
async fn chat_approval_accepts_a_review_thread() {
    let h = harness(vec![vec![
        ScriptedTurn::say("").call("mark_for_review", json!({"summary": "nothing to do"})),
    ]])
    .await;
    let thread = h
        .manager
        .spawn_worker("alice", "quick", "nothing")
        .await
        .expect("spawn");
    h.manager.wait_for_run(&thread.id).await;

    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let conn = h.registry.register("alice", tx).await;
    h.manager
        .select_thread(conn, &thread.id)
        .await
        .expect("select");
    h.manager
        .handle_chat_message(conn, "LGTM, ship it")
        .await
        .expect("chat");

    assert_eq!(
        h.storage.get_thread(&thread.id).await.unwrap().unwrap().status,
        ThreadStatus::Accepted
    );
}

#[tokio::test]
async fn approval_quorum_waits_for_distinct_users() {
    let h = harness_with_quorum(
        vec![vec![
            ScriptedTurn::say("").call("mark_for_review", json!({"summary": "done"})),
        ]],
        2,
    )
    .await;
    let thread = h
        .manager
        .spawn_worker("alice", "quorum", "nothing")
        .await
        .expect("spawn");
    h.manager.wait_for_run(&thread.id).await;

    let (tx_a, _rx_a) = tokio::sync::mpsc::unbounded_channel();
    let conn_a = h.registry.register("alice", tx_a).await;
    h.manager.select_thread(conn_a, &thread.id).await.expect("select");
    h.manager
        .handle_chat_message(conn_a, "approved")
        .await
        .expect("first approval");
    assert_eq!(
        h.storage.get_thread(&thread.id).await.unwrap().unwrap().status,
        ThreadStatus::Review,
        "one approval must not meet a quorum of two"
    );

    let (tx_b, _rx_b) = tokio::sync::mpsc::unbounded_channel();
    let conn_b = h.registry.register("bob", tx_b).await;
    h.manager.select_thread(conn_b, &thread.id).await.expect("select");
    h.manager
        .handle_chat_message(conn_b, "approve")
        .await
        .expect("second approval");
    assert_eq!(
        h.storage.get_thread(&thread.id).await.unwrap().unwrap().status,
        ThreadStatus::Accepted
    );
}

#[tokio::test]
async fn terminal_threads_refuse_chat() {
    let h = harness(vec![vec![
        ScriptedTurn::say("").call("mark_for_review", json!({"summary": "done"})),
    ]])
    .await;
    let thread = h
        .manager
        .spawn_worker("alice", "done", "nothing")
        .await
        .expect("spawn");
    h.manager.wait_for_run(&thread.id).await;
    h.manager.accept_thread(&thread.id).await.expect("accept");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let conn = h.registry.register("alice", tx).await;
    h.manager.select_thread(conn, &thread.id).await.expect("select");
    // Drain the thread_selected event.
    let _ = rx.recv().await;

    h.manager
        .handle_chat_message(conn, "hello?")
        .await
        .expect("chat call itself succeeds");
    match rx.recv().await.expect("event") {
        WsEvent::Error { message } => assert!(message.contains("accepted"), "got {message}"),
        other => panic!("expected error event, got {other:?}"),
    }
}

#[tokio::test]
async fn chat_reply_lands_after_the_frame_handler_returns() {
    let h = harness(vec![vec![ScriptedTurn::say("Happy to help.")]]).await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let conn = h.registry.register("alice", tx).await;
    h.manager.connect(conn, "alice", "Alice").await.expect("connect");
    let assistant_id = match rx.recv().await.expect("event") {
        WsEvent::ThreadSelected { thread, .. } => thread.id,
        other => panic!("expected thread_selected, got {other:?}"),
    };
    let _ = rx.recv().await; // thread_list

    h.manager
        .handle_chat_message(conn, "hello")
        .await
        .expect("chat");

    // The handler hands the turn to a tracked background task. On the
    // single-threaded test runtime that task has not run yet, so only the
    // user's message is in the log when the handler returns.
    let before = h
        .storage
        .list_messages(&assistant_id, 100)
        .await
        .expect("messages");
    assert!(before.iter().any(|m| m.content == "hello"));
    assert!(
        before.iter().all(|m| m.role != MessageRole::Assistant),
        "reply must not be produced inside the frame handler"
    );

    h.manager.wait_for_run(&assistant_id).await;
    let after = h
        .storage
        .list_messages(&assistant_id, 100)
        .await
        .expect("messages");
    assert!(after
        .iter()
        .any(|m| m.role == MessageRole::Assistant && m.content == "Happy to help."));

    // The run's events reached the connection channel.
    let mut saw_complete = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, WsEvent::AgentComplete { .. }) {
            saw_complete = true;
        }
    }
    assert!(saw_complete, "expected an agent_complete event");
}

/// Executor that parks its first turn until released, keeping a run in
/// flight for as long as the test needs.
struct GatedExecutor {
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

#[async_trait]
impl ConversationExecutor for GatedExecutor {
    async fn start_session(&self, _system_prompt: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn process_turn(&self, _user_message: &str, _tools: &ToolSet) -> TurnOutcome {
        if let Some(rx) = self.gate.lock().await.take() {
            let _ = rx.await;
        }
        TurnOutcome {
            status: TurnStatus::Completed,
            final_response: String::new(),
            tool_calls: Vec::new(),
            error: None,
        }
    }
}

#[tokio::test]
async fn busy_thread_rejects_chat_without_persisting_it() {
    let (release, gate) = oneshot::channel::<()>();
    let executor: Arc<dyn ConversationExecutor> = Arc::new(GatedExecutor {
        gate: Mutex::new(Some(gate)),
    });
    let factory: ExecutorFactory = Box::new(move |_| executor.clone());
    let h = harness_with_factory(factory, 1).await;

    let thread = h
        .manager
        .spawn_worker("alice", "gated", "wait for it")
        .await
        .expect("spawn");

    // The goal run parks inside the executor; wait until it is in flight.
    let mut in_flight = false;
    for _ in 0..400 {
        if h.manager.is_generating(&thread.id).await {
            in_flight = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(in_flight, "goal run never reached the executor");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let conn = h.registry.register("alice", tx).await;
    h.manager.select_thread(conn, &thread.id).await.expect("select");
    let _ = rx.recv().await; // thread_selected

    h.manager
        .handle_chat_message(conn, "any progress?")
        .await
        .expect("chat call itself succeeds");
    match rx.recv().await.expect("event") {
        WsEvent::Error { message } => {
            assert!(message.contains("already responding"), "got {message}")
        }
        other => panic!("expected error event, got {other:?}"),
    }

    // The refused message never entered the transcript: no later turn would
    // have consumed it.
    let messages = h
        .storage
        .list_messages(&thread.id, 100)
        .await
        .expect("messages");
    assert!(messages.iter().all(|m| m.content != "any progress?"));

    let _ = release.send(());
    h.manager.wait_for_run(&thread.id).await;
}

#[tokio::test]
async fn mention_notifies_the_named_users_connections() {
    let h = harness(vec![vec![]]).await;
    let thread = h
        .manager
        .spawn_worker("alice", "mentions", "nothing")
        .await
        .expect("spawn");
    h.manager.wait_for_run(&thread.id).await;

    let (tx_a, _rx_a) = tokio::sync::mpsc::unbounded_channel();
    let conn_a = h.registry.register("alice", tx_a).await;
    h.manager.select_thread(conn_a, &thread.id).await.expect("select");
    let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel();
    let _conn_b = h.registry.register("bob", tx_b).await;

    h.manager
        .handle_chat_message(conn_a, "@bob can you sanity-check this?")
        .await
        .expect("chat");
    h.manager.wait_for_run(&thread.id).await;

    // Bob is not viewing the thread, so the mention is the only event
    // his connection receives.
    match rx_b.recv().await.expect("event") {
        WsEvent::Mention { thread_id, from, text } => {
            assert_eq!(thread_id, thread.id);
            assert_eq!(from, "alice");
            assert!(text.contains("@bob"));
        }
        other => panic!("expected mention, got {other:?}"),
    }
}

#[tokio::test]
async fn rejection_reason_stays_in_the_transcript() {
    let h = harness(vec![vec![
        ScriptedTurn::say("").call("mark_for_review", json!({"summary": "done"})),
    ]])
    .await;
    let thread = h
        .manager
        .spawn_worker("alice", "rejected", "nothing")
        .await
        .expect("spawn");
    h.manager.wait_for_run(&thread.id).await;

    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let conn = h.registry.register("alice", tx).await;
    h.manager.select_thread(conn, &thread.id).await.expect("select");
    h.manager
        .handle_chat_message(conn, "needs work: the citations are missing")
        .await
        .expect("chat");

    assert_eq!(
        h.storage.get_thread(&thread.id).await.unwrap().unwrap().status,
        ThreadStatus::Rejected
    );
    let messages = h
        .storage
        .list_messages(&thread.id, 100)
        .await
        .expect("messages");
    assert!(
        messages
            .iter()
            .any(|m| m.role == MessageRole::User && m.content.contains("citations")),
        "the reviewer's stated reason must be logged"
    );
}

#[tokio::test]
async fn insert_lines_keeps_the_trailing_newline() {
    let h = harness(vec![vec![]]).await;
    let worker = h
        .manager
        .spawn_worker("alice", "insert", "edit lines")
        .await
        .expect("spawn");
    h.manager.wait_for_run(&worker.id).await;
    let worker = h
        .storage
        .get_thread(&worker.id)
        .await
        .expect("get")
        .expect("exists");
    let root = worker.worktree_path.clone().expect("worktree");

    let tools = build_toolset(&ToolContext {
        storage: h.storage.clone(),
        wiki: h.wiki.clone(),
        registry: h.registry.clone(),
        root: root.clone(),
        thread: worker,
        spawner: None,
    });
    let result = tools
        .invoke("write_page", json!({"path": "List", "content": "alpha\nbeta\n"}))
        .await;
    assert!(result.starts_with("Wrote"), "got {result}");
    let result = tools
        .invoke("insert_lines", json!({"path": "List", "line": 2, "text": "inserted"}))
        .await;
    assert!(result.starts_with("Inserted"), "got {result}");

    let page = h
        .wiki
        .read_page(&root, "List")
        .await
        .expect("read")
        .expect("page");
    assert_eq!(page.content, "alpha\ninserted\nbeta\n");
}

#[tokio::test]
async fn reject_command_from_chat() {
    let h = harness(vec![vec![
        ScriptedTurn::say("").call("mark_for_review", json!({"summary": "meh"})),
    ]])
    .await;
    let thread = h
        .manager
        .spawn_worker("alice", "rejectable", "nothing")
        .await
        .expect("spawn");
    h.manager.wait_for_run(&thread.id).await;

    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let conn = h.registry.register("alice", tx).await;
    h.manager.select_thread(conn, &thread.id).await.expect("select");
    h.manager
        .handle_chat_message(conn, "/reject")
        .await
        .expect("command");

    assert_eq!(
        h.storage.get_thread(&thread.id).await.unwrap().unwrap().status,
        ThreadStatus::Rejected
    );
}
