//! Read capability: page fetch, full-text search, listing.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::wiki::WikiStore;

use super::{opt_str, opt_u64, req_str, ToolContext, ToolHandler};

const SEARCH_LIMIT: usize = 20;
const LIST_LIMIT: usize = 200;

pub fn install(ctx: &ToolContext, handlers: &mut Vec<Arc<dyn ToolHandler>>) {
    handlers.push(Arc::new(ReadPage {
        wiki: ctx.wiki.clone(),
        root: ctx.root.clone(),
    }));
    handlers.push(Arc::new(SearchPages {
        wiki: ctx.wiki.clone(),
        root: ctx.root.clone(),
    }));
    handlers.push(Arc::new(ListPages {
        wiki: ctx.wiki.clone(),
        root: ctx.root.clone(),
    }));
}

struct ReadPage {
    wiki: Arc<WikiStore>,
    root: PathBuf,
}

#[async_trait]
impl ToolHandler for ReadPage {
    fn name(&self) -> &'static str {
        "read_page"
    }

    fn description(&self) -> &'static str {
        "Read a wiki page by path. Args: {path}"
    }

    async fn call(&self, args: Value) -> String {
        let path = match req_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        match self.wiki.read_page(&self.root, &path).await {
            Ok(Some(page)) => format!("# {}\n\n{}", page.title, page.content),
            Ok(None) => format!("Error: page '{path}' not found"),
            Err(e) => format!("Error: failed to read '{path}': {e}"),
        }
    }
}

struct SearchPages {
    wiki: Arc<WikiStore>,
    root: PathBuf,
}

#[async_trait]
impl ToolHandler for SearchPages {
    fn name(&self) -> &'static str {
        "search_pages"
    }

    fn description(&self) -> &'static str {
        "Full-text search across all pages. Args: {query, limit?}"
    }

    async fn call(&self, args: Value) -> String {
        let query = match req_str(&args, "query") {
            Ok(q) => q,
            Err(e) => return e,
        };
        let limit = opt_u64(&args, "limit").unwrap_or(SEARCH_LIMIT as u64) as usize;
        match self.wiki.search_pages(&self.root, &query, limit).await {
            Ok(hits) if hits.is_empty() => format!("No pages match '{query}'"),
            Ok(hits) => hits
                .iter()
                .map(|h| format!("{}:{}: {}", h.path, h.line_number, h.line))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("Error: search failed: {e}"),
        }
    }
}

struct ListPages {
    wiki: Arc<WikiStore>,
    root: PathBuf,
}

#[async_trait]
impl ToolHandler for ListPages {
    fn name(&self) -> &'static str {
        "list_pages"
    }

    fn description(&self) -> &'static str {
        "List page paths, optionally filtered by a glob pattern. Args: {pattern?, limit?}"
    }

    async fn call(&self, args: Value) -> String {
        let pattern = opt_str(&args, "pattern");
        let limit = opt_u64(&args, "limit").unwrap_or(LIST_LIMIT as u64) as usize;
        match self
            .wiki
            .list_pages(&self.root, pattern.as_deref(), limit)
            .await
        {
            Ok(paths) if paths.is_empty() => "No pages found".to_string(),
            Ok(paths) => paths.join("\n"),
            Err(e) => format!("Error: listing failed: {e}"),
        }
    }
}
