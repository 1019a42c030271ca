use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4400;
const DEFAULT_TRUNK: &str = "main";
const DEFAULT_PRUNE_DAYS: u32 = 30;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── LoopConfig ───────────────────────────────────────────────────────────────

/// Autonomous-execution limits (`[loop]` in config.toml).
///
/// These bound how much a single agent run may do unsupervised. Every field
/// has the documented default; tighten per-deployment without a recompile.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Maximum bounded turns per execution (default: 15).
    pub max_iterations: u32,
    /// Maximum tool calls within one turn before the run is stopped (default: 5).
    pub max_tools_per_iteration: usize,
    /// Wall-clock budget per execution in seconds (default: 300).
    pub timeout_seconds: u64,
    /// Identical tool-call signatures within the sliding window that flag
    /// repetitive behavior (default: 3).
    pub repetition_threshold: usize,
    /// Distinct pages an execution may touch (default: 100).
    pub max_pages_per_run: usize,
    /// Edits an execution may make before it must go to review (default: 10).
    pub max_edits_per_pr: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_tools_per_iteration: 5,
            timeout_seconds: 300,
            repetition_threshold: 3,
            max_pages_per_run: 100,
            max_edits_per_pr: 10,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// WebSocket server port (default: 4400). The REST mirror binds port + 1.
    port: Option<u16>,
    /// Bind address (default: "127.0.0.1"; use "0.0.0.0" for LAN access).
    bind_address: Option<String>,
    /// Path to the wiki git repository.
    wiki_repo: Option<PathBuf>,
    /// Trunk branch representing the published wiki (default: "main").
    trunk_branch: Option<String>,
    /// Log level filter string, e.g. "debug", "info,loomd=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default) | "json".
    log_format: Option<String>,
    /// Distinct approving users required to accept from chat signals (default: 1).
    approval_quorum: Option<usize>,
    /// Days before terminal threads are pruned from SQLite (default: 30; 0 = never).
    thread_prune_days: Option<u32>,
    /// Autonomous-loop limits (`[loop]`).
    #[serde(rename = "loop")]
    loop_limits: Option<LoopConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── DaemonConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub port: u16,
    pub bind_address: String,
    pub data_dir: PathBuf,
    /// The shared wiki repository all threads branch from.
    pub wiki_repo: PathBuf,
    pub trunk_branch: String,
    pub log: String,
    /// "pretty" (default) | "json" (structured for log aggregators).
    pub log_format: String,
    /// Distinct approving users required before a chat-signal accept fires.
    pub approval_quorum: usize,
    pub thread_prune_days: u32,
    pub loop_limits: LoopConfig,
}

impl DaemonConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        wiki_repo: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());
        let bind_address = bind_address
            .or(std::env::var("LOOMD_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let wiki_repo = wiki_repo
            .or(toml.wiki_repo)
            .unwrap_or_else(|| data_dir.join("wiki"));

        let trunk_branch = toml
            .trunk_branch
            .unwrap_or_else(|| DEFAULT_TRUNK.to_string());

        let log_format = std::env::var("LOOMD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        Self {
            port,
            bind_address,
            data_dir,
            wiki_repo,
            trunk_branch,
            log,
            log_format,
            approval_quorum: toml.approval_quorum.unwrap_or(1),
            thread_prune_days: toml.thread_prune_days.unwrap_or(DEFAULT_PRUNE_DAYS),
            loop_limits: toml.loop_limits.unwrap_or_default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("loomd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("loomd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("loomd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("loomd");
        }
    }
    PathBuf::from(".loomd")
}
