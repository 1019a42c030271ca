//! Async facade over the blocking git helpers.
//!
//! One `WikiStore` per daemon. Worktrees live at
//! `{worktree_base}/{branch with '/' replaced}` and are created lazily when a
//! worker thread initializes its branch. Trunk-mutating merges are serialized
//! by `merge_lock` so two concurrent accepts never race on the trunk ref.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{git, pages, GitError, GitResult, Page, PageHit};

#[derive(Debug, Clone, Serialize)]
pub struct DiffStat {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
    pub summary: String,
}

pub struct WikiStore {
    repo_path: PathBuf,
    trunk: String,
    worktree_base: PathBuf,
    /// Narrow critical section around trunk-mutating merges.
    merge_lock: Mutex<()>,
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("git task panicked")?
}

async fn run_blocking_git<T, F>(f: F) -> GitResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> GitResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GitError::Other(anyhow::anyhow!("git task panicked: {e}")))?
}

impl WikiStore {
    /// Open (or initialize) the wiki repository.
    pub async fn open(repo_path: &Path, trunk: &str, worktree_base: &Path) -> Result<Self> {
        let repo = repo_path.to_path_buf();
        let trunk_name = trunk.to_string();
        run_blocking(move || git::init_repo(&repo, &trunk_name)).await?;
        tokio::fs::create_dir_all(worktree_base).await?;
        info!(repo = %repo_path.display(), trunk, "wiki store opened");
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
            trunk: trunk.to_string(),
            worktree_base: worktree_base.to_path_buf(),
            merge_lock: Mutex::new(()),
        })
    }

    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    /// Primary checkout root — where assistant (read-only) tools read pages.
    pub fn trunk_dir(&self) -> &Path {
        &self.repo_path
    }

    /// Filesystem location a worktree for `branch` would occupy.
    pub fn worktree_path_for(&self, branch: &str) -> PathBuf {
        self.worktree_base.join(branch.replace('/', "--"))
    }

    // ─── Branch / worktree lifecycle ─────────────────────────────────────────

    pub async fn create_branch(&self, branch: &str) -> Result<()> {
        let repo = self.repo_path.clone();
        let branch = branch.to_string();
        let trunk = self.trunk.clone();
        run_blocking(move || git::create_branch(&repo, &branch, &trunk)).await
    }

    pub async fn delete_branch(&self, branch: &str, force: bool) -> Result<()> {
        let repo = self.repo_path.clone();
        let branch = branch.to_string();
        run_blocking(move || git::delete_branch(&repo, &branch, force)).await
    }

    /// Create the worktree for `branch` and return its path.
    pub async fn create_worktree(&self, branch: &str) -> Result<PathBuf> {
        let wt_path = self.worktree_path_for(branch);
        let repo = self.repo_path.clone();
        let branch_name = branch.to_string();
        let wt = wt_path.clone();
        run_blocking(move || git::add_worktree(&repo, &branch_name, &wt)).await?;
        debug!(branch, path = %wt_path.display(), "worktree created");
        Ok(wt_path)
    }

    /// Remove the worktree for `branch`. Idempotent: a missing worktree is a
    /// no-op, and a failed git prune still cleans the directory.
    pub async fn remove_worktree(&self, branch: &str) -> Result<()> {
        let wt_path = self.worktree_path_for(branch);
        let repo = self.repo_path.clone();
        let wt = wt_path.clone();
        let result = run_blocking(move || git::remove_worktree(&repo, &wt)).await;
        if let Err(e) = result {
            warn!(branch, err = %e, "git worktree removal failed — cleaning directory manually");
            if wt_path.exists() {
                tokio::fs::remove_dir_all(&wt_path).await.ok();
            }
        }
        Ok(())
    }

    // ─── Merging ─────────────────────────────────────────────────────────────

    /// Merge a thread branch into trunk. Holds the per-repository merge lock
    /// for the duration so concurrent accepts serialize.
    pub async fn merge_into_trunk(&self, source: &str) -> GitResult<()> {
        let _guard = self.merge_lock.lock().await;
        let repo = self.repo_path.clone();
        let source = source.to_string();
        let trunk = self.trunk.clone();
        run_blocking_git(move || git::merge_branch(&repo, &source, &trunk).map(|_| ())).await
    }

    /// Reverse merge for conflict resolution: trunk into the branch checked
    /// out at `worktree`. Returns `true` when conflict markers were written.
    pub async fn merge_trunk_into_worktree(&self, worktree: &Path) -> GitResult<bool> {
        let wt = worktree.to_path_buf();
        let trunk = self.trunk.clone();
        run_blocking_git(move || git::merge_into_worktree(&wt, &trunk)).await
    }

    /// Commit an unfinished merge in `worktree`, if one is in progress.
    pub async fn finalize_merge(&self, worktree: &Path, message: &str) -> Result<bool> {
        let wt = worktree.to_path_buf();
        let message = message.to_string();
        run_blocking(move || git::finalize_merge(&wt, &message)).await
    }

    pub async fn merge_in_progress(&self, worktree: &Path) -> Result<bool> {
        let wt = worktree.to_path_buf();
        run_blocking(move || git::merge_in_progress(&wt)).await
    }

    /// Stage and commit everything in `worktree`. Returns `false` when clean.
    pub async fn commit_all(&self, worktree: &Path, message: &str) -> Result<bool> {
        let wt = worktree.to_path_buf();
        let message = message.to_string();
        run_blocking(move || git::commit_all(&wt, &message)).await
    }

    // ─── Inspection ──────────────────────────────────────────────────────────

    pub async fn diff_stat(&self, ref1: &str, ref2: &str) -> Result<DiffStat> {
        let repo = self.repo_path.clone();
        let (a, b) = (ref1.to_string(), ref2.to_string());
        run_blocking(move || git::diff_stat(&repo, &a, &b)).await
    }

    pub async fn list_branches_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let repo = self.repo_path.clone();
        let prefix = prefix.to_string();
        run_blocking(move || git::list_branches_with_prefix(&repo, &prefix)).await
    }

    pub async fn tag_branch(&self, branch: &str, tag: &str) -> Result<()> {
        let repo = self.repo_path.clone();
        let (branch, tag) = (branch.to_string(), tag.to_string());
        run_blocking(move || git::tag_branch(&repo, &branch, &tag)).await
    }

    pub async fn branch_tags(&self, branch: &str) -> Result<Vec<String>> {
        let repo = self.repo_path.clone();
        let branch = branch.to_string();
        run_blocking(move || git::branch_tags(&repo, &branch)).await
    }

    // ─── Pages ───────────────────────────────────────────────────────────────
    //
    // Page operations take the working directory explicitly: a worker's tools
    // pass its worktree, an assistant's tools pass the trunk checkout.

    pub async fn read_page(&self, root: &Path, path: &str) -> Result<Option<Page>> {
        let (root, path) = (root.to_path_buf(), path.to_string());
        run_blocking(move || pages::read_page(&root, &path)).await
    }

    /// Write a page and commit the change.
    pub async fn write_page(&self, root: &Path, path: &str, content: &str) -> Result<String> {
        let (root_buf, path_s, content_s) =
            (root.to_path_buf(), path.to_string(), content.to_string());
        let rel = {
            let root = root_buf.clone();
            run_blocking(move || pages::write_page(&root, &path_s, &content_s)).await?
        };
        self.commit_all(root, &format!("Update {rel}")).await?;
        Ok(rel)
    }

    pub async fn delete_page(&self, root: &Path, path: &str) -> Result<bool> {
        let (root_buf, path_s) = (root.to_path_buf(), path.to_string());
        let removed = {
            let root = root_buf.clone();
            let path = path_s.clone();
            run_blocking(move || pages::delete_page(&root, &path)).await?
        };
        if removed {
            self.commit_all(root, &format!("Delete {path_s}")).await?;
        }
        Ok(removed)
    }

    pub async fn search_pages(
        &self,
        root: &Path,
        query: &str,
        limit: usize,
    ) -> Result<Vec<PageHit>> {
        let (root, query) = (root.to_path_buf(), query.to_string());
        run_blocking(move || pages::search_pages(&root, &query, limit)).await
    }

    pub async fn list_pages(
        &self,
        root: &Path,
        pattern: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let root = root.to_path_buf();
        let pattern = pattern.map(|s| s.to_string());
        run_blocking(move || pages::list_pages(&root, pattern.as_deref(), limit)).await
    }
}
