//! Page-level file handling inside a working directory (trunk checkout or a
//! thread worktree). Pages are markdown files keyed by repo-relative path;
//! the title is the path without its `.md` extension.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Result};
use regex::RegexBuilder;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    /// Repo-relative path, always ending in `.md`.
    pub path: String,
    pub title: String,
    pub content: String,
}

/// One search match: page plus the first matching line.
#[derive(Debug, Clone, Serialize)]
pub struct PageHit {
    pub path: String,
    pub title: String,
    pub line_number: usize,
    pub line: String,
}

/// Normalize a user/LLM-supplied page path: strip leading separators, append
/// `.md` when missing, and reject traversal outside the working directory.
pub fn normalize_page_path(raw: &str) -> Result<PathBuf> {
    let trimmed = raw.trim().trim_start_matches(['/', '\\']);
    if trimmed.is_empty() {
        bail!("page path is empty");
    }
    let with_ext = if trimmed.to_lowercase().ends_with(".md") {
        trimmed.to_string()
    } else {
        format!("{trimmed}.md")
    };
    let path = PathBuf::from(&with_ext);
    for comp in path.components() {
        match comp {
            Component::Normal(_) => {}
            Component::ParentDir => bail!("page path may not contain '..'"),
            _ => bail!("page path must be relative"),
        }
    }
    Ok(path)
}

pub fn title_of(path: &Path) -> String {
    path.with_extension("")
        .to_string_lossy()
        .replace('\\', "/")
}

pub fn read_page(root: &Path, raw_path: &str) -> Result<Option<Page>> {
    let rel = normalize_page_path(raw_path)?;
    let full = root.join(&rel);
    if !full.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(&full)?;
    Ok(Some(Page {
        path: rel.to_string_lossy().replace('\\', "/"),
        title: title_of(&rel),
        content,
    }))
}

/// Write a page (create or overwrite), creating parent directories. The
/// caller is responsible for committing.
pub fn write_page(root: &Path, raw_path: &str, content: &str) -> Result<String> {
    let rel = normalize_page_path(raw_path)?;
    let full = root.join(&rel);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&full, content)?;
    Ok(rel.to_string_lossy().replace('\\', "/"))
}

pub fn delete_page(root: &Path, raw_path: &str) -> Result<bool> {
    let rel = normalize_page_path(raw_path)?;
    let full = root.join(&rel);
    if !full.is_file() {
        return Ok(false);
    }
    fs::remove_file(&full)?;
    Ok(true)
}

/// Full-text search across pages. `query` is tried as a case-insensitive
/// regex first and falls back to a literal substring match when it does not
/// parse.
pub fn search_pages(root: &Path, query: &str, limit: usize) -> Result<Vec<PageHit>> {
    let matcher = RegexBuilder::new(query)
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(query))
                .case_insensitive(true)
                .build()
        })?;

    let mut hits = Vec::new();
    for rel in walk_pages(root)? {
        if hits.len() >= limit {
            break;
        }
        let full = root.join(&rel);
        let Ok(content) = fs::read_to_string(&full) else {
            continue;
        };
        for (i, line) in content.lines().enumerate() {
            if matcher.is_match(line) {
                hits.push(PageHit {
                    path: rel.to_string_lossy().replace('\\', "/"),
                    title: title_of(&rel),
                    line_number: i + 1,
                    line: line.trim().to_string(),
                });
                break;
            }
        }
    }
    Ok(hits)
}

/// List page paths, optionally filtered by a `*` glob pattern on the path.
pub fn list_pages(root: &Path, pattern: Option<&str>, limit: usize) -> Result<Vec<String>> {
    let matcher = match pattern {
        Some(p) if !p.trim().is_empty() => Some(glob_to_regex(p)?),
        _ => None,
    };
    let mut out = Vec::new();
    for rel in walk_pages(root)? {
        let s = rel.to_string_lossy().replace('\\', "/");
        if matcher.as_ref().map(|m| m.is_match(&s)).unwrap_or(true) {
            out.push(s);
            if out.len() >= limit {
                break;
            }
        }
    }
    Ok(out)
}

fn glob_to_regex(pattern: &str) -> Result<regex::Regex> {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Ok(RegexBuilder::new(&re).case_insensitive(true).build()?)
}

/// All `.md` files under `root`, sorted, `.git` excluded.
fn walk_pages(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            if name == ".git" {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().map(|e| e == "md").unwrap_or(false) {
                if let Ok(rel) = path.strip_prefix(root) {
                    out.push(rel.to_path_buf());
                }
            }
        }
    }
    out.sort();
    Ok(out)
}
