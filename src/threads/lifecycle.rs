//! Accept, reject, conflict resolution, and teardown for worker threads.
//!
//! These operate on storage + the wiki store directly; the orchestrator layers
//! executor/task teardown and broadcasts on top. Every exit path releases the
//! worktree; the branch is kept for audit and only deleted on explicit thread
//! deletion.

use anyhow::Result;
use tracing::{info, warn};

use crate::storage::Storage;
use crate::threads::model::{MessageRole, Thread, ThreadStatus};
use crate::wiki::{GitError, WikiStore};

/// Result of an accept attempt, surfaced to the caller so it can drive the
/// conflict-resolution flow or leave the thread in place for retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    Merged,
    Conflict { message: String },
    Error { message: String },
}

/// Merge the thread's branch into trunk.
///
/// On success the worktree is released and the thread becomes `Accepted`.
/// A conflict leaves the status untouched — the caller starts conflict
/// resolution. Any other git failure is recorded on the thread and the status
/// is left unchanged so the user can retry or reject.
pub async fn accept(storage: &Storage, wiki: &WikiStore, thread: &Thread) -> Result<AcceptOutcome> {
    if !thread.status.can_accept() {
        return Ok(AcceptOutcome::Error {
            message: format!("thread cannot be accepted from status '{}'", thread.status),
        });
    }
    let Some(branch) = thread.branch.as_deref() else {
        return Ok(AcceptOutcome::Error {
            message: "thread has no branch to merge".to_string(),
        });
    };

    match wiki.merge_into_trunk(branch).await {
        Ok(()) => {
            release_worktree(storage, wiki, thread).await;
            storage
                .update_thread_status(&thread.id, ThreadStatus::Accepted)
                .await?;
            info!(thread_id = %thread.id, branch, "thread accepted, branch merged into trunk");
            Ok(AcceptOutcome::Merged)
        }
        Err(GitError::Conflict(files)) => {
            info!(thread_id = %thread.id, branch, files = %files, "accept hit merge conflict");
            Ok(AcceptOutcome::Conflict {
                message: format!("merge conflict in: {files}"),
            })
        }
        Err(e) => {
            let message = e.to_string();
            storage.set_thread_error(&thread.id, Some(&message)).await?;
            warn!(thread_id = %thread.id, branch, err = %message, "accept failed");
            Ok(AcceptOutcome::Error { message })
        }
    }
}

/// Release the worktree and mark the thread `Rejected`. Safe no-op for
/// threads that are already terminal.
pub async fn reject(storage: &Storage, wiki: &WikiStore, thread: &Thread) -> Result<bool> {
    if thread.status.is_terminal() {
        return Ok(false);
    }
    release_worktree(storage, wiki, thread).await;
    storage
        .update_thread_status(&thread.id, ThreadStatus::Rejected)
        .await?;
    info!(thread_id = %thread.id, "thread rejected");
    Ok(true)
}

/// Start the automated conflict-resolution flow after a failed accept:
/// merge trunk into the thread's branch inside its own worktree (leaving
/// conflict markers in files), move the thread back to `Working`, and inject
/// a system message telling the agent what to do.
pub async fn begin_conflict_resolution(
    storage: &Storage,
    wiki: &WikiStore,
    thread: &Thread,
    conflict_message: &str,
) -> Result<()> {
    let Some(worktree) = thread.worktree_path.as_deref() else {
        anyhow::bail!("thread {} has no worktree for conflict resolution", thread.id);
    };

    // The reverse merge is expected to produce markers, not fail.
    match wiki.merge_trunk_into_worktree(worktree).await {
        Ok(conflicted) => {
            info!(thread_id = %thread.id, conflicted, "reverse merge applied for resolution");
        }
        Err(e) => {
            warn!(thread_id = %thread.id, err = %e, "reverse merge failed, agent must resolve manually");
        }
    }

    storage
        .update_thread_status(&thread.id, ThreadStatus::Working)
        .await?;
    storage
        .append_message(
            &thread.id,
            MessageRole::System,
            &format!(
                "Merging your branch into the main wiki failed: {conflict_message}. \
                 The main branch has been merged into yours; files now contain \
                 conflict markers (<<<<<<< / ======= / >>>>>>>). Read each \
                 conflicted page, edit it to the correct merged content, then \
                 call mark_for_review again."
            ),
            None,
            None,
            None,
            None,
        )
        .await?;
    Ok(())
}

/// Tear down the thread's git footprint entirely: worktree and branch.
/// Used by thread deletion; idempotent at every step.
pub async fn teardown_git(storage: &Storage, wiki: &WikiStore, thread: &Thread) {
    release_worktree(storage, wiki, thread).await;
    if let Some(branch) = thread.branch.as_deref() {
        if let Err(e) = wiki.delete_branch(branch, true).await {
            warn!(thread_id = %thread.id, branch, err = %e, "branch delete failed during teardown");
        }
    }
}

/// Remove the thread's worktree and clear the stored path. Best-effort and
/// idempotent: a missing worktree or a git failure is logged, never fatal.
pub async fn release_worktree(storage: &Storage, wiki: &WikiStore, thread: &Thread) {
    let Some(branch) = thread.branch.as_deref() else {
        return;
    };
    if thread.worktree_path.is_none() {
        return;
    }
    if let Err(e) = wiki.remove_worktree(branch).await {
        warn!(thread_id = %thread.id, branch, err = %e, "worktree removal failed");
    }
    if let Err(e) = storage.set_thread_worktree(&thread.id, None).await {
        warn!(thread_id = %thread.id, err = %e, "failed to clear worktree path");
    }
}
