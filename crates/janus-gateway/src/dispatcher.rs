use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use janus_types::events::GatewayEvent;

struct ConnectionHandle {
    tx: mpsc::UnboundedSender<GatewayEvent>,
    group: Option<String>,
}

/// Tracks live connections and the broadcast group each one joined.
/// A group is named after the event key; a connection is in at most one.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// conn_id -> outbound channel and current group
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,

    /// group name -> member conn_ids
    groups: RwLock<HashMap<String, HashSet<Uuid>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. Returns its id and the receiver that feeds
    /// its socket.
    pub async fn register_connection(&self) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .await
            .insert(conn_id, ConnectionHandle { tx, group: None });
        (conn_id, rx)
    }

    /// Drop the connection and its group membership.
    pub async fn unregister_connection(&self, conn_id: Uuid) {
        let handle = self.inner.connections.write().await.remove(&conn_id);
        if let Some(group) = handle.and_then(|h| h.group) {
            self.remove_member(&group, conn_id).await;
        }
    }

    /// Move `conn_id` into `group`, leaving whatever group it was in before.
    pub async fn join_group(&self, conn_id: Uuid, group: &str) {
        let previous = {
            let mut connections = self.inner.connections.write().await;
            let Some(handle) = connections.get_mut(&conn_id) else {
                return;
            };
            handle.group.replace(group.to_string())
        };

        if let Some(previous) = previous.filter(|p| p != group) {
            self.remove_member(&previous, conn_id).await;
        }
        self.inner
            .groups
            .write()
            .await
            .entry(group.to_string())
            .or_default()
            .insert(conn_id);
    }

    /// Send to one connection. Silently dropped if it is gone.
    pub async fn send_to(&self, conn_id: Uuid, event: GatewayEvent) {
        if let Some(handle) = self.inner.connections.read().await.get(&conn_id) {
            let _ = handle.tx.send(event);
        }
    }

    /// Fan `event` out to every member of `group`, the sender included.
    /// Returns how many connections it was handed to.
    pub async fn emit(&self, group: &str, event: GatewayEvent) -> usize {
        // Copy members out so the two locks are never held together.
        let members: Vec<Uuid> = match self.inner.groups.read().await.get(group) {
            Some(members) => members.iter().copied().collect(),
            None => return 0,
        };

        let connections = self.inner.connections.read().await;
        let mut delivered = 0;
        for conn_id in members {
            if let Some(handle) = connections.get(&conn_id) {
                if handle.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!(group, delivered, "Emitted event");
        delivered
    }

    pub async fn group_size(&self, group: &str) -> usize {
        self.inner
            .groups
            .read()
            .await
            .get(group)
            .map_or(0, HashSet::len)
    }

    async fn remove_member(&self, group: &str, conn_id: Uuid) {
        let mut groups = self.inner.groups.write().await;
        if let Some(members) = groups.get_mut(group) {
            members.remove(&conn_id);
            if members.is_empty() {
                groups.remove(group);
            }
        }
    }
}
