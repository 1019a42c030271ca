//! Write capability: page create/overwrite, exact-text edit, line insert,
//! rename. Worker-only; every successful mutation commits in the thread's
//! own worktree.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::wiki::WikiStore;

use super::{opt_u64, req_str, ToolContext, ToolHandler};

pub fn install(ctx: &ToolContext, handlers: &mut Vec<Arc<dyn ToolHandler>>) {
    let wiki = ctx.wiki.clone();
    let root = ctx.root.clone();
    handlers.push(Arc::new(WritePage {
        wiki: wiki.clone(),
        root: root.clone(),
    }));
    handlers.push(Arc::new(EditPage {
        wiki: wiki.clone(),
        root: root.clone(),
    }));
    handlers.push(Arc::new(InsertLines {
        wiki: wiki.clone(),
        root: root.clone(),
    }));
    handlers.push(Arc::new(MovePage { wiki, root }));
}

struct WritePage {
    wiki: Arc<WikiStore>,
    root: PathBuf,
}

#[async_trait]
impl ToolHandler for WritePage {
    fn name(&self) -> &'static str {
        "write_page"
    }

    fn description(&self) -> &'static str {
        "Create or overwrite a page. Args: {path, content}"
    }

    async fn call(&self, args: Value) -> String {
        let path = match req_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let content = match args.get("content").and_then(Value::as_str) {
            Some(c) => c.to_string(),
            None => return "Error: missing required argument 'content'".to_string(),
        };
        match self.wiki.write_page(&self.root, &path, &content).await {
            Ok(rel) => format!("Wrote {rel}"),
            Err(e) => format!("Error: failed to write '{path}': {e}"),
        }
    }
}

struct EditPage {
    wiki: Arc<WikiStore>,
    root: PathBuf,
}

#[async_trait]
impl ToolHandler for EditPage {
    fn name(&self) -> &'static str {
        "edit_page"
    }

    fn description(&self) -> &'static str {
        "Replace an exact text fragment in a page. Args: {path, old_text, new_text}"
    }

    async fn call(&self, args: Value) -> String {
        let path = match req_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let old_text = match req_str(&args, "old_text") {
            Ok(t) => t,
            Err(e) => return e,
        };
        let new_text = match args.get("new_text").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None => return "Error: missing required argument 'new_text'".to_string(),
        };

        let page = match self.wiki.read_page(&self.root, &path).await {
            Ok(Some(p)) => p,
            Ok(None) => return format!("Error: page '{path}' not found"),
            Err(e) => return format!("Error: failed to read '{path}': {e}"),
        };
        if !page.content.contains(&old_text) {
            return format!("Error: old_text not found in '{path}'");
        }
        let updated = page.content.replacen(&old_text, &new_text, 1);
        match self.wiki.write_page(&self.root, &path, &updated).await {
            Ok(rel) => format!("Edited {rel}"),
            Err(e) => format!("Error: failed to write '{path}': {e}"),
        }
    }
}

struct InsertLines {
    wiki: Arc<WikiStore>,
    root: PathBuf,
}

#[async_trait]
impl ToolHandler for InsertLines {
    fn name(&self) -> &'static str {
        "insert_lines"
    }

    fn description(&self) -> &'static str {
        "Insert text at a 1-based line number (append when past the end). \
         Args: {path, line, text}"
    }

    async fn call(&self, args: Value) -> String {
        let path = match req_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let Some(line) = opt_u64(&args, "line") else {
            return "Error: missing required argument 'line'".to_string();
        };
        let text = match args.get("text").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None => return "Error: missing required argument 'text'".to_string(),
        };

        let page = match self.wiki.read_page(&self.root, &path).await {
            Ok(Some(p)) => p,
            Ok(None) => return format!("Error: page '{path}' not found"),
            Err(e) => return format!("Error: failed to read '{path}': {e}"),
        };
        let mut lines: Vec<&str> = page.content.lines().collect();
        let at = (line.max(1) as usize - 1).min(lines.len());
        lines.insert(at, &text);
        let mut updated = lines.join("\n");
        // lines() strips the terminator; keep the file's trailing newline.
        if page.content.ends_with('\n') {
            updated.push('\n');
        }
        match self.wiki.write_page(&self.root, &path, &updated).await {
            Ok(rel) => format!("Inserted at line {line} of {rel}"),
            Err(e) => format!("Error: failed to write '{path}': {e}"),
        }
    }
}

struct MovePage {
    wiki: Arc<WikiStore>,
    root: PathBuf,
}

#[async_trait]
impl ToolHandler for MovePage {
    fn name(&self) -> &'static str {
        "move_page"
    }

    fn description(&self) -> &'static str {
        "Rename/move a page. Args: {path, new_path}"
    }

    async fn call(&self, args: Value) -> String {
        let path = match req_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let new_path = match req_str(&args, "new_path") {
            Ok(p) => p,
            Err(e) => return e,
        };

        let page = match self.wiki.read_page(&self.root, &path).await {
            Ok(Some(p)) => p,
            Ok(None) => return format!("Error: source page '{path}' not found"),
            Err(e) => return format!("Error: failed to read '{path}': {e}"),
        };
        if let Err(e) = self.wiki.write_page(&self.root, &new_path, &page.content).await {
            return format!("Error: failed to write '{new_path}': {e}");
        }
        match self.wiki.delete_page(&self.root, &path).await {
            Ok(_) => format!("Moved {path} -> {new_path}"),
            Err(e) => format!("Error: wrote '{new_path}' but failed to remove '{path}': {e}"),
        }
    }
}
