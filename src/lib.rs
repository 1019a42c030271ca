//! loomd — a daemon orchestrating human/LLM collaboration threads over a
//! git-backed wiki.
//!
//! Each worker thread edits pages on its own branch + worktree; an accept
//! merges the branch into trunk (or starts automated conflict resolution).
//! The WebSocket server fans events out to viewing clients; the REST surface
//! mirrors the same operations.

pub mod agent;
pub mod config;
pub mod manager;
pub mod rest;
pub mod server;
pub mod signals;
pub mod storage;
pub mod threads;
pub mod tools;
pub mod wiki;

use std::sync::Arc;

use anyhow::Result;

use crate::config::DaemonConfig;
use crate::manager::{ClientRegistry, ExecutorFactory, ThreadManager};
use crate::storage::Storage;
use crate::wiki::WikiStore;

/// Everything the servers need, built once at startup.
pub struct AppContext {
    pub config: DaemonConfig,
    pub storage: Arc<Storage>,
    pub wiki: Arc<WikiStore>,
    pub manager: Arc<ThreadManager>,
}

impl AppContext {
    pub async fn init(config: DaemonConfig, executor_factory: ExecutorFactory) -> Result<Self> {
        let storage = Arc::new(Storage::new(&config.data_dir).await?);
        let wiki = Arc::new(
            WikiStore::open(
                &config.wiki_repo,
                &config.trunk_branch,
                &config.data_dir.join("worktrees"),
            )
            .await?,
        );
        let registry = Arc::new(ClientRegistry::new());
        let manager = ThreadManager::new(
            storage.clone(),
            wiki.clone(),
            registry,
            config.loop_limits.into(),
            config.approval_quorum,
            executor_factory,
        );
        manager.recover_on_startup().await?;
        Ok(Self {
            config,
            storage,
            wiki,
            manager,
        })
    }
}
