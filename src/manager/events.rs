//! Outbound WebSocket events and the connected-client registry.
//!
//! Events are a typed union serialized with a `type` tag; the orchestrator
//! pushes them onto per-connection channels instead of holding transport
//! closures. Addressing is one client, all viewers of a thread, or everyone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::threads::model::{Message, Thread, ThreadStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    ThreadSelected {
        thread: Thread,
        messages: Vec<Message>,
        is_generating: bool,
    },
    ThreadList {
        threads: Vec<Thread>,
    },
    ThreadCreated {
        thread: Thread,
    },
    ThreadMessage {
        thread_id: String,
        message: Message,
    },
    ThreadStatus {
        thread_id: String,
        status: ThreadStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        review_summary: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    AgentStart {
        thread_id: String,
    },
    AgentComplete {
        thread_id: String,
        stop_reason: String,
    },
    PageUpdated {
        thread_id: String,
        path: String,
    },
    PagesChanged,
    AcceptConflict {
        thread_id: String,
        message: String,
    },
    Mention {
        thread_id: String,
        from: String,
        text: String,
    },
    Error {
        message: String,
    },
    Success {
        message: String,
    },
}

pub type ConnId = u64;

struct ClientHandle {
    user_id: String,
    sender: mpsc::UnboundedSender<WsEvent>,
    /// The thread this connection currently has in view, if any.
    viewing: Option<String>,
}

/// All live WebSocket connections. One entry per connection, not per user —
/// a user may have several tabs viewing different threads.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ConnId, ClientHandle>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user_id: &str, sender: mpsc::UnboundedSender<WsEvent>) -> ConnId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.write().await.insert(
            id,
            ClientHandle {
                user_id: user_id.to_string(),
                sender,
                viewing: None,
            },
        );
        debug!(conn = id, user_id, "client registered");
        id
    }

    pub async fn unregister(&self, conn: ConnId) {
        self.clients.write().await.remove(&conn);
        debug!(conn, "client unregistered");
    }

    /// Attach the authenticated user once the connect request arrives.
    pub async fn set_user(&self, conn: ConnId, user_id: &str) {
        if let Some(handle) = self.clients.write().await.get_mut(&conn) {
            handle.user_id = user_id.to_string();
        }
    }

    pub async fn user_of(&self, conn: ConnId) -> Option<String> {
        self.clients
            .read()
            .await
            .get(&conn)
            .map(|c| c.user_id.clone())
    }

    pub async fn set_viewing(&self, conn: ConnId, thread_id: Option<String>) {
        if let Some(handle) = self.clients.write().await.get_mut(&conn) {
            handle.viewing = thread_id;
        }
    }

    pub async fn viewing(&self, conn: ConnId) -> Option<String> {
        self.clients
            .read()
            .await
            .get(&conn)
            .and_then(|c| c.viewing.clone())
    }

    /// Deliver to one connection. Send failures mean the connection is gone;
    /// the accept loop will unregister it.
    pub async fn send(&self, conn: ConnId, event: WsEvent) {
        if let Some(handle) = self.clients.read().await.get(&conn) {
            let _ = handle.sender.send(event);
        }
    }

    pub async fn broadcast(&self, event: WsEvent) {
        for handle in self.clients.read().await.values() {
            let _ = handle.sender.send(event.clone());
        }
    }

    /// Deliver to every connection belonging to `user_id`, whatever it views.
    pub async fn send_to_user(&self, user_id: &str, event: WsEvent) {
        for handle in self.clients.read().await.values() {
            if handle.user_id == user_id {
                let _ = handle.sender.send(event.clone());
            }
        }
    }

    /// Deliver to every connection currently viewing `thread_id`.
    pub async fn broadcast_to_thread_viewers(&self, thread_id: &str, event: WsEvent) {
        for handle in self.clients.read().await.values() {
            if handle.viewing.as_deref() == Some(thread_id) {
                let _ = handle.sender.send(event.clone());
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_carry_a_type_tag() {
        let json = serde_json::to_value(WsEvent::AgentStart {
            thread_id: "th-1234".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "agent_start");
        assert_eq!(json["thread_id"], "th-1234");

        let json = serde_json::to_value(WsEvent::PagesChanged).unwrap();
        assert_eq!(json["type"], "pages_changed");
    }

    #[tokio::test]
    async fn thread_viewer_broadcast_is_scoped() {
        let registry = ClientRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.register("alice", tx_a).await;
        let b = registry.register("bob", tx_b).await;
        registry.set_viewing(a, Some("th-aaaa".into())).await;
        registry.set_viewing(b, Some("th-bbbb".into())).await;

        registry
            .broadcast_to_thread_viewers(
                "th-aaaa",
                WsEvent::AgentStart {
                    thread_id: "th-aaaa".into(),
                },
            )
            .await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn user_delivery_reaches_every_tab_of_that_user() {
        let registry = ClientRegistry::new();
        let (tx_a1, mut rx_a1) = mpsc::unbounded_channel();
        let (tx_a2, mut rx_a2) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.register("alice", tx_a1).await;
        registry.register("alice", tx_a2).await;
        registry.register("bob", tx_b).await;

        registry
            .send_to_user(
                "alice",
                WsEvent::Mention {
                    thread_id: "th-aaaa".into(),
                    from: "bob".into(),
                    text: "@alice ping".into(),
                },
            )
            .await;

        assert!(rx_a1.try_recv().is_ok());
        assert!(rx_a2.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_drops_delivery() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = registry.register("alice", tx).await;
        registry.unregister(conn).await;
        registry
            .broadcast(WsEvent::Success {
                message: "hi".into(),
            })
            .await;
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.connection_count().await, 0);
    }
}
