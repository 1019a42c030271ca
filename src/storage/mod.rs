//! SQLite persistence for users, threads, and messages.
//!
//! Statuses and kinds are stored as lowercase strings; timestamps as RFC3339.
//! The conversation log is append-only — messages are never updated.

use anyhow::{Context as _, Result};
use chrono::Utc;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

use crate::threads::model::{Message, MessageRole, Thread, ThreadKind, ThreadStatus};

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the daemon indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ThreadRow {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub kind: String,
    pub status: String,
    pub goal: Option<String>,
    pub branch: Option<String>,
    pub worktree_path: Option<String>,
    pub review_summary: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: String,
    pub thread_id: String,
    pub role: String,
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_args: Option<String>,
    pub tool_result: Option<String>,
    pub user_id: Option<String>,
    pub created_at: String,
}

/// Convert a raw thread row into the domain type.
pub fn row_to_thread(row: ThreadRow) -> Result<Thread> {
    let kind = ThreadKind::parse(&row.kind)
        .ok_or_else(|| anyhow::anyhow!("unknown thread kind: {}", row.kind))?;
    let status = ThreadStatus::parse(&row.status)
        .ok_or_else(|| anyhow::anyhow!("unknown thread status: {}", row.status))?;
    Ok(Thread {
        id: row.id,
        name: row.name,
        owner_id: row.owner_id,
        kind,
        status,
        goal: row.goal,
        branch: row.branch,
        worktree_path: row.worktree_path.map(Into::into),
        review_summary: row.review_summary,
        error: row.error,
        created_at: parse_ts(&row.created_at),
        updated_at: parse_ts(&row.updated_at),
    })
}

pub fn row_to_message(row: MessageRow) -> Result<Message> {
    let role = MessageRole::parse(&row.role)
        .ok_or_else(|| anyhow::anyhow!("unknown message role: {}", row.role))?;
    let tool_args = match row.tool_args {
        Some(s) => Some(serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
        None => None,
    };
    Ok(Message {
        id: row.id,
        thread_id: row.thread_id,
        role,
        content: row.content,
        tool_name: row.tool_name,
        tool_args,
        tool_result: row.tool_result,
        user_id: row.user_id,
        created_at: parse_ts(&row.created_at),
    })
}

fn parse_ts(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("loomd.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .foreign_keys(true)
                .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database for tests. Pinned to a single long-lived connection:
    /// every `:memory:` connection is its own database, so a wider pool would
    /// hand out empty ones.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("src/storage/migrations")
            .run(pool)
            .await
            .context("failed to run database migrations")?;
        Ok(())
    }

    // ─── Users ───────────────────────────────────────────────────────────────

    /// Find a user by id, creating the record on first connect.
    pub async fn get_or_create_user(&self, id: &str, name: &str) -> Result<UserRow> {
        if let Some(existing) = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(existing);
        }
        let now = Utc::now().to_rfc3339();
        sqlx::query("INSERT INTO users (id, name, created_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        Ok(UserRow {
            id: id.to_string(),
            name: name.to_string(),
            created_at: now,
        })
    }

    // ─── Threads ─────────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn create_thread(
        &self,
        id: &str,
        name: &str,
        owner_id: &str,
        kind: ThreadKind,
        status: ThreadStatus,
        goal: Option<&str>,
        branch: Option<&str>,
    ) -> Result<Thread> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO threads
                 (id, name, owner_id, kind, status, goal, branch, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(owner_id)
        .bind(kind.as_str())
        .bind(status.as_str())
        .bind(goal)
        .bind(branch)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_thread(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("thread not found after insert"))
    }

    pub async fn get_thread(&self, id: &str) -> Result<Option<Thread>> {
        let row: Option<ThreadRow> = sqlx::query_as("SELECT * FROM threads WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_thread).transpose()
    }

    pub async fn list_threads(&self) -> Result<Vec<Thread>> {
        with_timeout(async {
            let rows: Vec<ThreadRow> =
                sqlx::query_as("SELECT * FROM threads ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?;
            rows.into_iter().map(row_to_thread).collect()
        })
        .await
    }

    /// Threads filtered by kind and/or status (both optional).
    pub async fn list_threads_filtered(
        &self,
        kind: Option<ThreadKind>,
        status: Option<ThreadStatus>,
    ) -> Result<Vec<Thread>> {
        let rows: Vec<ThreadRow> = sqlx::query_as(
            "SELECT * FROM threads
             WHERE (?1 IS NULL OR kind = ?1)
               AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC",
        )
        .bind(kind.map(|k| k.as_str()))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_thread).collect()
    }

    /// The user's single live assistant thread, if one exists.
    pub async fn find_active_assistant(&self, owner_id: &str) -> Result<Option<Thread>> {
        let row: Option<ThreadRow> = sqlx::query_as(
            "SELECT * FROM threads
             WHERE owner_id = ? AND kind = 'assistant' AND status = 'active'
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_thread).transpose()
    }

    pub async fn update_thread_status(&self, id: &str, status: ThreadStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE threads SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_thread_review_summary(&self, id: &str, summary: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE threads SET review_summary = ?, updated_at = ? WHERE id = ?")
            .bind(summary)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_thread_error(&self, id: &str, error: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE threads SET error = ?, updated_at = ? WHERE id = ?")
            .bind(error)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_thread_name(&self, id: &str, name: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE threads SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record the outcome of branch initialization. `worktree_path = NULL`
    /// marks the worktree as released (the invariant: non-NULL iff a live
    /// worktree exists for the branch).
    pub async fn set_thread_worktree(&self, id: &str, worktree_path: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE threads SET worktree_path = ?, updated_at = ? WHERE id = ?")
            .bind(worktree_path)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a thread and (via FK cascade) its messages. Idempotent.
    pub async fn delete_thread(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM threads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Worker threads that still own a live worktree — re-registered with the
    /// wiki store on startup so a restarted daemon can keep serving them.
    pub async fn list_live_worker_threads(&self) -> Result<Vec<Thread>> {
        let rows: Vec<ThreadRow> = sqlx::query_as(
            "SELECT * FROM threads
             WHERE kind = 'worker' AND worktree_path IS NOT NULL
               AND status NOT IN ('accepted', 'rejected', 'archived')
             ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_thread).collect()
    }

    // ─── Messages ────────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn append_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: &str,
        tool_name: Option<&str>,
        tool_args: Option<&serde_json::Value>,
        tool_result: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Message> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let args_json = tool_args.map(|v| v.to_string());
        // Bump the thread's updated_at in the same transaction as the append.
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO messages
                 (id, thread_id, role, content, tool_name, tool_args, tool_result, user_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(thread_id)
        .bind(role.as_str())
        .bind(content)
        .bind(tool_name)
        .bind(&args_json)
        .bind(tool_result)
        .bind(user_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE threads SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(thread_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let row: MessageRow = sqlx::query_as("SELECT * FROM messages WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        row_to_message(row)
    }

    /// Messages in append order (oldest first). Ordered by insertion rowid,
    /// so messages sharing a timestamp still come back in the order written.
    pub async fn list_messages(&self, thread_id: &str, limit: i64) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM (
                 SELECT rowid AS seq, * FROM messages WHERE thread_id = ?
                 ORDER BY seq DESC LIMIT ?
             ) ORDER BY seq ASC",
        )
        .bind(thread_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_message).collect()
    }

    /// Full-text search over message content across all threads.
    pub async fn search_messages(&self, query: &str, limit: i64) -> Result<Vec<Message>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM messages WHERE content LIKE ? ESCAPE '\\'
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_message).collect()
    }

    // ─── Maintenance ─────────────────────────────────────────────────────────

    /// Delete terminal threads older than `days` days. Pass `0` to skip.
    pub async fn prune_terminal_threads(&self, days: u32) -> Result<u64> {
        if days == 0 {
            return Ok(0);
        }
        with_timeout(async {
            let cutoff = (Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
            let n = sqlx::query(
                "DELETE FROM threads
                 WHERE status IN ('accepted', 'rejected', 'archived') AND updated_at < ?",
            )
            .bind(&cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
            Ok(n)
        })
        .await
    }

    /// Run SQLite VACUUM to reclaim disk space after pruning.
    pub async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}
