//! Deterministic, git-safe branch names for worker threads.
//!
//! Every worker gets a branch `thread/{slug}-{suffix}` derived from its
//! human-readable name. The slug is safe for git refs: lowercase
//! alphanumerics and single hyphens only, length-capped, never empty.

use uuid::Uuid;

/// Prefix shared by every thread branch; used by `list_branches_with_prefix`
/// to enumerate thread branches for audit.
pub const BRANCH_PREFIX: &str = "thread/";

/// Maximum length of the sanitized name portion (before the suffix).
const SLUG_CAP: usize = 40;

/// Total branch name length cap, prefix and suffix included.
pub const BRANCH_NAME_CAP: usize = 64;

/// Derive the branch name for a new worker thread.
///
/// Deterministic in the name portion; a 4-hex-char uniqueness suffix keeps
/// two workers named "Fix typos" from colliding.
pub fn branch_name_for(thread_name: &str) -> String {
    let suffix = short_suffix();
    format!("{}{}-{}", BRANCH_PREFIX, sanitize_slug(thread_name), suffix)
}

/// Sanitize a free-text thread name into a git-safe slug.
///
/// Lowercases, collapses every non-alphanumeric run into a single hyphen,
/// trims leading/trailing hyphens, and caps the length. Names that sanitize
/// to nothing (emoji-only, empty) become `worker`.
pub fn sanitize_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len().min(SLUG_CAP));
    let mut last_hyphen = true; // suppress a leading hyphen
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
        if slug.len() >= SLUG_CAP {
            break;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "worker".to_string()
    } else {
        slug
    }
}

fn short_suffix() -> String {
    let u = Uuid::new_v4().simple().to_string();
    u[..4].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_valid(branch: &str) {
        let rest = branch
            .strip_prefix(BRANCH_PREFIX)
            .expect("missing thread/ prefix");
        assert!(!rest.is_empty());
        assert!(branch.len() <= BRANCH_NAME_CAP, "too long: {branch}");
        assert!(
            rest.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
            "illegal char in {branch}"
        );
        assert!(!rest.starts_with('-') && !rest.ends_with('-'));
        assert!(!rest.contains("--"), "duplicate hyphens in {branch}");
    }

    #[test]
    fn simple_name() {
        let b = branch_name_for("Fix login bug");
        assert!(b.starts_with("thread/fix-login-bug-"));
        assert_valid(&b);
    }

    #[test]
    fn empty_name_falls_back() {
        let b = branch_name_for("");
        assert!(b.starts_with("thread/worker-"));
        assert_valid(&b);
    }

    #[test]
    fn slashes_and_dots_collapse() {
        let b = branch_name_for("docs/api.lock");
        assert!(b.starts_with("thread/docs-api-lock-"));
        assert_valid(&b);
    }

    #[test]
    fn unicode_only_name_falls_back() {
        assert_valid(&branch_name_for("日本語ページ"));
        assert_valid(&branch_name_for("🚀🚀🚀"));
    }

    #[test]
    fn long_names_are_capped() {
        let long = "a very long thread name that keeps going and going and going forever";
        let b = branch_name_for(long);
        assert_valid(&b);
    }

    #[test]
    fn punctuation_runs_collapse_to_one_hyphen() {
        assert_eq!(sanitize_slug("a -- b !! c"), "a-b-c");
        assert_eq!(sanitize_slug("--leading and trailing--"), "leading-and-trailing");
    }

    #[test]
    fn two_threads_same_name_get_distinct_branches() {
        let a = branch_name_for("dup");
        let b = branch_name_for("dup");
        assert_ne!(a, b);
    }
}
