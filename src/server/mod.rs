//! WebSocket endpoint: one accept loop, one task per connection.
//!
//! Each connection gets an unbounded outbound event channel registered with
//! the client registry; the per-connection task selects over inbound frames
//! and outbound events. Request parse errors are answered with an error
//! event; a failing connection never takes down the accept loop.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::manager::{ConnId, ThreadManager, WsEvent};
use crate::tools::WorkerSpawner;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientRequest {
    Connect {
        user_id: String,
        #[serde(default)]
        user_name: Option<String>,
    },
    SelectThread {
        thread_id: String,
    },
    Chat {
        text: String,
    },
    SpawnThread {
        name: String,
        goal: String,
    },
    AcceptThread {
        thread_id: String,
    },
    RejectThread {
        thread_id: String,
    },
    ArchiveThread {
        thread_id: String,
    },
    ListThreads,
    DeleteThread {
        thread_id: String,
    },
}

/// Accept connections until `shutdown` resolves.
pub async fn run(
    listener: TcpListener,
    manager: Arc<ThreadManager>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "websocket server listening");
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        let manager = manager.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, manager).await {
                                warn!(%peer, err = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(err = %e, "accept failed"),
                }
            }
            _ = &mut shutdown => {
                info!("websocket server shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, manager: Arc<ThreadManager>) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<WsEvent>();
    let conn = manager.registry().register("anonymous", tx).await;

    let result: Result<()> = async {
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let json = serde_json::to_string(&event)?;
                    sink.send(WsMessage::Text(json.into())).await?;
                }
                frame = source.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            handle_frame(&manager, conn, &text).await;
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            sink.send(WsMessage::Pong(data)).await?;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(conn, err = %e, "websocket read error");
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    manager.disconnect(conn).await;
    result
}

async fn handle_frame(manager: &Arc<ThreadManager>, conn: ConnId, text: &str) {
    let request: ClientRequest = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            manager
                .registry()
                .send(
                    conn,
                    WsEvent::Error {
                        message: format!("invalid request: {e}"),
                    },
                )
                .await;
            return;
        }
    };
    if let Err(e) = dispatch(manager, conn, request).await {
        error!(conn, err = %e, "request failed");
        manager
            .registry()
            .send(
                conn,
                WsEvent::Error {
                    message: e.to_string(),
                },
            )
            .await;
    }
}

async fn dispatch(
    manager: &Arc<ThreadManager>,
    conn: ConnId,
    request: ClientRequest,
) -> Result<()> {
    match request {
        ClientRequest::Connect { user_id, user_name } => {
            let name = user_name.unwrap_or_else(|| user_id.clone());
            manager.registry().set_user(conn, &user_id).await;
            manager.connect(conn, &user_id, &name).await
        }
        ClientRequest::SelectThread { thread_id } => manager.select_thread(conn, &thread_id).await,
        ClientRequest::Chat { text } => manager.handle_chat_message(conn, &text).await,
        ClientRequest::SpawnThread { name, goal } => {
            let owner = manager
                .registry()
                .user_of(conn)
                .await
                .unwrap_or_else(|| "anonymous".to_string());
            let thread = manager.spawn_worker(&owner, &name, &goal).await?;
            manager
                .registry()
                .send(
                    conn,
                    WsEvent::Success {
                        message: format!("spawned worker {}", thread.id),
                    },
                )
                .await;
            Ok(())
        }
        ClientRequest::AcceptThread { thread_id } => {
            manager.accept_thread(&thread_id).await.map(|_| ())
        }
        ClientRequest::RejectThread { thread_id } => {
            manager.reject_thread(&thread_id).await.map(|_| ())
        }
        ClientRequest::ArchiveThread { thread_id } => manager.archive_thread(&thread_id).await,
        ClientRequest::ListThreads => {
            let threads = manager.list_threads().await?;
            manager
                .registry()
                .send(conn, WsEvent::ThreadList { threads })
                .await;
            Ok(())
        }
        ClientRequest::DeleteThread { thread_id } => manager.delete_thread(&thread_id).await,
    }
}
