//! Shared harness for the integration tests: tempdir-backed wiki store,
//! in-memory storage, and a factory that hands out scripted executors in
//! creation order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use loomd::agent::{ConversationExecutor, ScriptedExecutor, ScriptedTurn};
use loomd::manager::{ClientRegistry, ExecutorFactory, ThreadManager};
use loomd::storage::Storage;
use loomd::wiki::WikiStore;

pub struct Harness {
    // Held for the lifetime of the test; dropping it removes the repo.
    pub _dir: TempDir,
    pub storage: Arc<Storage>,
    pub wiki: Arc<WikiStore>,
    pub registry: Arc<ClientRegistry>,
    pub manager: Arc<ThreadManager>,
}

/// Executors are created once per thread, in order: the first spawned thread
/// gets the first script, and so on. Threads beyond the scripted list get an
/// empty script (every turn completes with no tool calls).
pub fn scripted_factory(scripts: Vec<Vec<ScriptedTurn>>) -> ExecutorFactory {
    let queue = Arc::new(Mutex::new(VecDeque::from(scripts)));
    Box::new(move |_thread| {
        let script = queue
            .lock()
            .expect("script queue poisoned")
            .pop_front()
            .unwrap_or_default();
        Arc::new(ScriptedExecutor::new(script)) as Arc<dyn ConversationExecutor>
    })
}

pub async fn harness(scripts: Vec<Vec<ScriptedTurn>>) -> Harness {
    harness_with_quorum(scripts, 1).await
}

pub async fn harness_with_quorum(scripts: Vec<Vec<ScriptedTurn>>, quorum: usize) -> Harness {
    harness_with_factory(scripted_factory(scripts), quorum).await
}

/// Build the harness around an arbitrary executor factory, for tests that
/// need more control over turn timing than a script gives.
pub async fn harness_with_factory(factory: ExecutorFactory, quorum: usize) -> Harness {
    let dir = TempDir::new().expect("tempdir");
    let storage = Arc::new(Storage::in_memory().await.expect("storage"));
    let wiki = Arc::new(
        WikiStore::open(&dir.path().join("wiki"), "main", &dir.path().join("worktrees"))
            .await
            .expect("wiki store"),
    );
    let registry = Arc::new(ClientRegistry::new());
    let manager = ThreadManager::new(
        storage.clone(),
        wiki.clone(),
        registry.clone(),
        Default::default(),
        quorum,
        factory,
    );
    Harness {
        _dir: dir,
        storage,
        wiki,
        registry,
        manager,
    }
}
