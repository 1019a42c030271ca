use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use loomd::agent::{ConversationExecutor, ScriptedExecutor};
use loomd::config::DaemonConfig;
use loomd::AppContext;

#[derive(Parser, Debug)]
#[command(name = "loomd", about = "Thread orchestration daemon for a git-backed wiki")]
struct Cli {
    /// WebSocket port (REST mirror binds port + 1)
    #[arg(long, env = "LOOMD_PORT")]
    port: Option<u16>,

    /// Data directory (SQLite, worktrees, config.toml)
    #[arg(long, env = "LOOMD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Path to the wiki git repository
    #[arg(long, env = "LOOMD_WIKI_REPO")]
    wiki_repo: Option<std::path::PathBuf>,

    /// Log filter, e.g. "info" or "loomd=debug"
    #[arg(long, env = "LOOMD_LOG")]
    log: Option<String>,

    /// Bind address ("0.0.0.0" for LAN access)
    #[arg(long)]
    bind: Option<String>,
}

fn init_tracing(config: &DaemonConfig) {
    let filter = EnvFilter::try_new(&config.log).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DaemonConfig::new(cli.port, cli.data_dir, cli.wiki_repo, cli.log, cli.bind);
    init_tracing(&config);
    info!(
        data_dir = %config.data_dir.display(),
        wiki_repo = %config.wiki_repo.display(),
        trunk = %config.trunk_branch,
        "starting loomd"
    );

    // Vendor LLM adapters plug in by implementing ConversationExecutor; the
    // built-in executor answers every turn with no tool calls, which keeps
    // the daemon runnable without provider credentials.
    let factory = Box::new(|_thread: &loomd::threads::Thread| {
        Arc::new(ScriptedExecutor::default()) as Arc<dyn ConversationExecutor>
    });

    let ctx = AppContext::init(config, factory).await?;
    let config = &ctx.config;

    // Daily maintenance: prune old terminal threads, reclaim space.
    let storage = ctx.storage.clone();
    let prune_days = config.thread_prune_days;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        loop {
            tick.tick().await;
            match storage.prune_terminal_threads(prune_days).await {
                Ok(0) => {}
                Ok(n) => {
                    info!(pruned = n, "pruned terminal threads");
                    if let Err(e) = storage.vacuum().await {
                        warn!(err = %e, "vacuum failed");
                    }
                }
                Err(e) => warn!(err = %e, "thread pruning failed"),
            }
        }
    });

    // REST mirror on port + 1.
    let rest_addr = format!("{}:{}", config.bind_address, config.port + 1);
    let rest_listener = TcpListener::bind(&rest_addr).await?;
    info!(addr = %rest_addr, "rest server listening");
    let rest_router = loomd::rest::router(ctx.manager.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(rest_listener, rest_router).await {
            error!(err = %e, "rest server failed");
        }
    });

    // WebSocket server on the main port, until SIGTERM/Ctrl-C.
    let ws_addr = format!("{}:{}", config.bind_address, config.port);
    let ws_listener = TcpListener::bind(&ws_addr).await?;
    loomd::server::run(ws_listener, ctx.manager.clone(), shutdown_signal()).await?;

    info!("loomd stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(err = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received ctrl-c"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received ctrl-c");
    }
}
