//! Connected client sessions.
//!
//! Sessions live in a keyed map (connection id → handle); the role is a
//! tagged value set by the handshake, and the "receivers connected" figure
//! is derived by predicate instead of a side counter. Writes go through a
//! per-session channel drained by a dedicated writer task, so fan-out never
//! blocks on a slow peer.

use rf_protocol::ClientRole;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

pub type ClientId = u64;

#[derive(Debug)]
pub struct ClientHandle {
    pub role: Option<ClientRole>,
    /// Set for node sessions; required by their handshake.
    pub uuid: Option<String>,
    tx: mpsc::UnboundedSender<String>,
}

impl ClientHandle {
    fn write(&self, line: &str) {
        let _ = self.tx.send(line.to_string());
    }
}

#[derive(Debug, Clone, Default)]
pub struct Clients {
    inner: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
}

impl Clients {
    pub fn new() -> Self {
        Clients::default()
    }

    pub async fn insert(&self, id: ClientId, tx: mpsc::UnboundedSender<String>) {
        self.inner.write().await.insert(
            id,
            ClientHandle {
                role: None,
                uuid: None,
                tx,
            },
        );
    }

    pub async fn remove(&self, id: ClientId) -> Option<ClientHandle> {
        let removed = self.inner.write().await.remove(&id);
        if let Some(handle) = &removed {
            debug!(id, role = ?handle.role, "session removed");
        }
        removed
    }

    pub async fn set_role(&self, id: ClientId, role: ClientRole) {
        if let Some(handle) = self.inner.write().await.get_mut(&id) {
            handle.role = Some(role);
        }
    }

    /// Revert a session to unclassified (a node handshake missing its uuid).
    pub async fn clear_role(&self, id: ClientId) {
        if let Some(handle) = self.inner.write().await.get_mut(&id) {
            handle.role = None;
        }
    }

    pub async fn set_uuid(&self, id: ClientId, uuid: String) {
        if let Some(handle) = self.inner.write().await.get_mut(&id) {
            handle.uuid = Some(uuid);
        }
    }

    pub async fn role(&self, id: ClientId) -> Option<ClientRole> {
        self.inner.read().await.get(&id).and_then(|h| h.role)
    }

    /// How many sessions currently receive broadcasts.
    pub async fn receiver_count(&self) -> usize {
        self.inner
            .read()
            .await
            .values()
            .filter(|h| h.role.is_some_and(ClientRole::is_broadcast_target))
            .count()
    }

    pub async fn send_to(&self, id: ClientId, line: &str) {
        if let Some(handle) = self.inner.read().await.get(&id) {
            handle.write(line);
        }
    }

    /// Write `line` to every session holding `role`; returns how many.
    pub async fn send_to_role(&self, role: ClientRole, line: &str) -> usize {
        let map = self.inner.read().await;
        let mut written = 0;
        for handle in map.values().filter(|h| h.role == Some(role)) {
            handle.write(line);
            written += 1;
        }
        written
    }

    pub async fn node_ids(&self) -> Vec<ClientId> {
        self.inner
            .read()
            .await
            .iter()
            .filter(|(_, h)| h.role == Some(ClientRole::Node))
            .map(|(&id, _)| id)
            .collect()
    }
}

/// Drain a session's outbound channel onto its socket, one line per
/// message. Ends when the channel closes or the peer goes away.
pub fn spawn_writer(
    mut half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let framed = format!("{line}\n");
            if half.write_all(framed.as_bytes()).await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receiver_count_is_derived_from_roles() {
        let clients = Clients::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        for id in 0..4u64 {
            clients.insert(id, tx.clone()).await;
        }
        clients.set_role(0, ClientRole::Gui).await;
        clients.set_role(1, ClientRole::Receiver).await;
        clients.set_role(2, ClientRole::Sender).await;
        assert_eq!(clients.receiver_count().await, 2);

        clients.set_role(3, ClientRole::Node).await;
        assert_eq!(clients.receiver_count().await, 3);

        clients.remove(1).await;
        assert_eq!(clients.receiver_count().await, 2);
    }

    #[tokio::test]
    async fn send_to_role_targets_exact_roles() {
        let clients = Clients::new();
        let (gui_tx, mut gui_rx) = mpsc::unbounded_channel();
        let (rec_tx, mut rec_rx) = mpsc::unbounded_channel();
        clients.insert(1, gui_tx).await;
        clients.insert(2, rec_tx).await;
        clients.set_role(1, ClientRole::Gui).await;
        clients.set_role(2, ClientRole::Receiver).await;

        assert_eq!(clients.send_to_role(ClientRole::Gui, "hello").await, 1);
        assert_eq!(gui_rx.try_recv().unwrap(), "hello");
        assert!(rec_rx.try_recv().is_err());
    }
}
