//! Blocking git2 helpers. Never call these from async code directly —
//! `WikiStore` dispatches them through `spawn_blocking`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use git2::{BranchType, Repository, Signature};
use tracing::debug;

use super::{GitError, GitResult};

/// Commit author used for daemon-made commits (merges, page edits).
pub const AUTHOR_NAME: &str = "loomd";
pub const AUTHOR_EMAIL: &str = "loomd@localhost";

fn signature() -> Result<Signature<'static>> {
    Ok(Signature::now(AUTHOR_NAME, AUTHOR_EMAIL)?)
}

/// Initialize a wiki repository with an empty initial commit on `trunk`.
/// No-op if the repository already exists.
pub fn init_repo(path: &Path, trunk: &str) -> Result<()> {
    if path.join(".git").exists() {
        return Ok(());
    }
    std::fs::create_dir_all(path)?;
    let mut opts = git2::RepositoryInitOptions::new();
    opts.initial_head(trunk);
    let repo = Repository::init_opts(path, &opts)?;
    let sig = signature()?;
    let tree_id = repo.index()?.write_tree()?;
    let tree = repo.find_tree(tree_id)?;
    repo.commit(Some("HEAD"), &sig, &sig, "Initialize wiki", &tree, &[])?;
    Ok(())
}

/// Create `branch` pointing at the head of `from`. Reuses an existing branch
/// of the same name (idempotent re-spawn after a crash).
pub fn create_branch(repo_path: &Path, branch: &str, from: &str) -> Result<()> {
    let repo = Repository::open(repo_path).context("failed to open repository")?;
    let from_commit = repo
        .find_branch(from, BranchType::Local)
        .with_context(|| format!("base branch {from} not found"))?
        .get()
        .peel_to_commit()?;
    let result = match repo.branch(branch, &from_commit, false) {
        Ok(_) => Ok(()),
        Err(e) if e.code() == git2::ErrorCode::Exists => {
            debug!(branch, "branch already exists — reusing");
            Ok(())
        }
        Err(e) => bail!("failed to create branch {branch}: {e}"),
    };
    result
}

pub fn delete_branch(repo_path: &Path, branch: &str, force: bool) -> Result<()> {
    let repo = Repository::open(repo_path)?;
    let mut b = match repo.find_branch(branch, BranchType::Local) {
        Ok(b) => b,
        // Already gone — deletion is idempotent.
        Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if !force {
        // Refuse to drop unmerged work unless forced.
        let head = repo
            .find_branch(&current_trunk(&repo)?, BranchType::Local)?
            .get()
            .peel_to_commit()?
            .id();
        let tip = b.get().peel_to_commit()?.id();
        if !repo.graph_descendant_of(head, tip)? && head != tip {
            bail!("branch {branch} is not merged; pass force to delete");
        }
    }
    b.delete().context("failed to delete branch")?;
    Ok(())
}

fn current_trunk(repo: &Repository) -> Result<String> {
    // HEAD of the primary checkout names the trunk branch.
    let head = repo.head()?;
    Ok(head.shorthand().unwrap_or("main").to_string())
}

/// Add a worktree for `branch` at `wt_path`, checking out the branch.
pub fn add_worktree(repo_path: &Path, branch: &str, wt_path: &Path) -> Result<()> {
    let repo = Repository::open(repo_path)?;
    let b = repo
        .find_branch(branch, BranchType::Local)
        .with_context(|| format!("branch {branch} not found"))?;
    // Branch names contain '/' which git disallows in worktree names.
    let wt_name = branch.replace('/', "--");
    let mut wt_opts = git2::WorktreeAddOptions::new();
    wt_opts.reference(Some(b.get()));
    repo.worktree(&wt_name, wt_path, Some(&wt_opts))
        .context("failed to add git worktree")?;
    Ok(())
}

/// Prune the worktree whose checkout lives at `wt_path` and remove its
/// directory. Unregistered directories are cleaned up anyway.
pub fn remove_worktree(repo_path: &Path, wt_path: &Path) -> Result<()> {
    let repo = Repository::open(repo_path)?;
    let names = repo.worktrees().context("failed to list worktrees")?;
    for name in names.iter().flatten() {
        if let Ok(wt) = repo.find_worktree(name) {
            if wt.path() == wt_path {
                let mut opts = git2::WorktreePruneOptions::new();
                opts.valid(true).working_tree(true);
                wt.prune(Some(&mut opts)).context("failed to prune worktree")?;
                if wt_path.exists() {
                    std::fs::remove_dir_all(wt_path)
                        .context("failed to remove worktree directory")?;
                }
                return Ok(());
            }
        }
    }
    if wt_path.exists() {
        std::fs::remove_dir_all(wt_path).context("failed to remove orphaned worktree directory")?;
    }
    Ok(())
}

/// Merge `source` into `target` at the tree level — no working-tree checkout
/// of `target` is performed, so the primary checkout is never disturbed.
///
/// Returns the merge commit id (or the fast-forwarded tip). A conflicted
/// merge index yields `GitError::Conflict` listing the conflicted paths and
/// leaves both branches untouched.
pub fn merge_branch(repo_path: &Path, source: &str, target: &str) -> GitResult<git2::Oid> {
    let repo = Repository::open(repo_path).map_err(GitError::Git)?;
    let source_commit = repo
        .find_branch(source, BranchType::Local)
        .map_err(GitError::Git)?
        .get()
        .peel_to_commit()
        .map_err(GitError::Git)?;
    let target_commit = repo
        .find_branch(target, BranchType::Local)
        .map_err(GitError::Git)?
        .get()
        .peel_to_commit()
        .map_err(GitError::Git)?;

    // Already merged — nothing to do.
    if repo
        .graph_descendant_of(target_commit.id(), source_commit.id())
        .map_err(GitError::Git)?
        || source_commit.id() == target_commit.id()
    {
        return Ok(target_commit.id());
    }

    // Fast-forward when the target has not diverged.
    if repo
        .graph_descendant_of(source_commit.id(), target_commit.id())
        .map_err(GitError::Git)?
    {
        let refname = format!("refs/heads/{target}");
        repo.reference(
            &refname,
            source_commit.id(),
            true,
            &format!("merge {source}: fast-forward"),
        )
        .map_err(GitError::Git)?;
        sync_primary_checkout(&repo, target).map_err(GitError::Git)?;
        return Ok(source_commit.id());
    }

    let mut index = repo
        .merge_commits(&target_commit, &source_commit, None)
        .map_err(GitError::Git)?;

    if index.has_conflicts() {
        let files: Vec<String> = index
            .conflicts()
            .map_err(GitError::Git)?
            .filter_map(|c| c.ok())
            .filter_map(|c| c.our.or(c.their))
            .filter_map(|e| String::from_utf8(e.path).ok())
            .collect();
        return Err(GitError::Conflict(files.join(", ")));
    }

    let tree_id = index.write_tree_to(&repo).map_err(GitError::Git)?;
    let tree = repo.find_tree(tree_id).map_err(GitError::Git)?;
    let sig = signature().map_err(GitError::Other)?;
    let message = format!("Merge {source} into {target}");
    let oid = repo
        .commit(
            Some(&format!("refs/heads/{target}")),
            &sig,
            &sig,
            &message,
            &tree,
            &[&target_commit, &source_commit],
        )
        .map_err(GitError::Git)?;
    sync_primary_checkout(&repo, target).map_err(GitError::Git)?;
    Ok(oid)
}

/// After a ref-level merge into the branch the primary checkout has checked
/// out, refresh its working tree so page reads see the merged content.
fn sync_primary_checkout(repo: &Repository, branch: &str) -> std::result::Result<(), git2::Error> {
    if let Ok(head) = repo.head() {
        if head.shorthand() == Some(branch) {
            let mut co = git2::build::CheckoutBuilder::new();
            co.force();
            repo.checkout_head(Some(&mut co))?;
        }
    }
    Ok(())
}

/// Merge `source` into the branch checked out at `wt_path`, writing conflict
/// markers into the working tree when the merge conflicts (`MERGE_HEAD` is
/// left set so a later commit finalizes the merge).
///
/// Returns `true` when conflict markers were written, `false` on a clean
/// merge (which is committed immediately) or when there was nothing to merge.
pub fn merge_into_worktree(wt_path: &Path, source: &str) -> GitResult<bool> {
    let repo = Repository::open(wt_path).map_err(GitError::Git)?;
    let source_ref = repo
        .find_branch(source, BranchType::Local)
        .map_err(GitError::Git)?
        .into_reference();
    let annotated = repo
        .reference_to_annotated_commit(&source_ref)
        .map_err(GitError::Git)?;

    let (analysis, _) = repo.merge_analysis(&[&annotated]).map_err(GitError::Git)?;
    if analysis.is_up_to_date() {
        return Ok(false);
    }
    if analysis.is_fast_forward() {
        let target = annotated.id();
        let head_ref = repo.head().map_err(GitError::Git)?;
        let refname = head_ref
            .name()
            .ok_or_else(|| GitError::Other(anyhow::anyhow!("worktree HEAD is not a branch")))?
            .to_string();
        repo.reference(&refname, target, true, &format!("merge {source}: fast-forward"))
            .map_err(GitError::Git)?;
        let mut co = git2::build::CheckoutBuilder::new();
        co.force();
        repo.checkout_head(Some(&mut co)).map_err(GitError::Git)?;
        return Ok(false);
    }

    let mut checkout = git2::build::CheckoutBuilder::new();
    checkout.allow_conflicts(true).conflict_style_merge(true);
    let mut merge_opts = git2::MergeOptions::new();
    repo.merge(&[&annotated], Some(&mut merge_opts), Some(&mut checkout))
        .map_err(GitError::Git)?;

    if repo.index().map_err(GitError::Git)?.has_conflicts() {
        return Ok(true);
    }
    // Clean merge — finish it right away.
    finalize_merge(wt_path, &format!("Merge {source}")).map_err(GitError::Other)?;
    Ok(false)
}

/// Commit an in-progress merge (two-parent commit) and clean repository
/// state. Returns `false` (no-op) when no merge is in progress.
pub fn finalize_merge(wt_path: &Path, message: &str) -> Result<bool> {
    let mut repo = Repository::open(wt_path)?;
    if repo.state() != git2::RepositoryState::Merge {
        return Ok(false);
    }
    let mut index = repo.index()?;
    index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
    index.write()?;
    if index.has_conflicts() {
        bail!("cannot finalize merge: conflicts remain in the index");
    }
    let tree_id = index.write_tree()?;
    let mut merge_oids = Vec::new();
    repo.mergehead_foreach(|oid| {
        merge_oids.push(*oid);
        true
    })?;
    let tree = repo.find_tree(tree_id)?;
    let head_commit = repo.head()?.peel_to_commit()?;

    let mut parents = vec![head_commit];
    for oid in merge_oids {
        if let Ok(c) = repo.find_commit(oid) {
            parents.push(c);
        }
    }
    let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

    let sig = signature()?;
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)?;
    repo.cleanup_state()?;
    Ok(true)
}

/// Stage everything in the working tree and commit. Returns `false` when the
/// tree is clean (no commit made).
pub fn commit_all(wt_path: &Path, message: &str) -> Result<bool> {
    let repo = Repository::open(wt_path)?;
    let mut index = repo.index()?;
    index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
    index.write()?;
    let tree_id = index.write_tree()?;
    let head_commit = repo.head()?.peel_to_commit()?;
    if tree_id == head_commit.tree_id() {
        return Ok(false);
    }
    let tree = repo.find_tree(tree_id)?;
    let sig = signature()?;
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&head_commit])?;
    Ok(true)
}

/// `true` when the working tree has an unfinished merge (`MERGE_HEAD` set).
pub fn merge_in_progress(wt_path: &Path) -> Result<bool> {
    let repo = Repository::open(wt_path)?;
    Ok(repo.state() == git2::RepositoryState::Merge)
}

/// Diff statistics between two refs (branch names or revspecs).
pub fn diff_stat(repo_path: &Path, ref1: &str, ref2: &str) -> Result<super::DiffStat> {
    let repo = Repository::open(repo_path)?;
    let tree1 = repo.revparse_single(ref1)?.peel_to_commit()?.tree()?;
    let tree2 = repo.revparse_single(ref2)?.peel_to_commit()?.tree()?;
    let diff = repo.diff_tree_to_tree(Some(&tree1), Some(&tree2), None)?;
    let stats = diff.stats()?;
    Ok(super::DiffStat {
        files_changed: stats.files_changed(),
        insertions: stats.insertions(),
        deletions: stats.deletions(),
        summary: format!(
            "{} file(s) changed, {} insertion(s), {} deletion(s)",
            stats.files_changed(),
            stats.insertions(),
            stats.deletions()
        ),
    })
}

pub fn list_branches_with_prefix(repo_path: &Path, prefix: &str) -> Result<Vec<String>> {
    let repo = Repository::open(repo_path)?;
    let mut out = Vec::new();
    for entry in repo.branches(Some(BranchType::Local))? {
        let (branch, _) = entry?;
        if let Some(name) = branch.name()? {
            if name.starts_with(prefix) {
                out.push(name.to_string());
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Create a lightweight tag at the branch head.
pub fn tag_branch(repo_path: &Path, branch: &str, tag: &str) -> Result<()> {
    let repo = Repository::open(repo_path)?;
    let commit = repo
        .find_branch(branch, BranchType::Local)?
        .get()
        .peel_to_commit()?;
    repo.tag_lightweight(tag, commit.as_object(), true)?;
    Ok(())
}

/// Tags pointing at the branch head commit.
pub fn branch_tags(repo_path: &Path, branch: &str) -> Result<Vec<String>> {
    let repo = Repository::open(repo_path)?;
    let head = repo
        .find_branch(branch, BranchType::Local)?
        .get()
        .peel_to_commit()?
        .id();
    let mut out = Vec::new();
    for name in repo.tag_names(None)?.iter().flatten() {
        if let Ok(obj) = repo.revparse_single(name) {
            if let Ok(commit) = obj.peel_to_commit() {
                if commit.id() == head {
                    out.push(name.to_string());
                }
            }
        }
    }
    Ok(out)
}
