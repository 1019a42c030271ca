//! Git-backed wiki storage.
//!
//! `WikiStore` is the only component that touches the repository. All libgit2
//! calls are blocking and run via `spawn_blocking`; the async facade lives in
//! [`store`], the raw helpers in [`git`], and page file handling in [`pages`].

pub mod git;
pub mod pages;
pub mod store;

pub use pages::{Page, PageHit};
pub use store::{DiffStat, WikiStore};

/// Failure modes callers must distinguish: a merge conflict triggers the
/// automated resolution flow, anything else is surfaced as-is.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("merge conflict in: {0}")]
    Conflict(String),
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GitError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, GitError::Conflict(_))
    }
}

pub type GitResult<T> = std::result::Result<T, GitError>;
