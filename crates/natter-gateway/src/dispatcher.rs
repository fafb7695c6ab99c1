use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use natter_types::events::GatewayEvent;

/// The live connection currently representing a user.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnectionHandle {
    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queue an event for this connection and return immediately.
    /// At-most-once: if the socket has already gone away the event is dropped.
    pub fn notify(&self, event: GatewayEvent) {
        if self.tx.send(event).is_err() {
            debug!("Connection {} closed before event could be queued", self.conn_id);
        }
    }
}

/// Presence registry: maps each connected user to their connection and
/// fans events out to them. Created once at server start and shared through
/// handler state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for events every connection receives
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// user_id -> active connection
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to broadcast events.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Bind a new connection to `user_id`, replacing any previous one.
    /// Returns (conn_id, receiver) for the connection loop.
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .await
            .insert(user_id, ConnectionHandle { conn_id, tx });
        (conn_id, rx)
    }

    /// Remove the user's entry, but only if `conn_id` still owns it.
    /// Returns true if an entry was removed.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut connections = self.inner.connections.write().await;
        match connections.get(&user_id) {
            Some(handle) if handle.conn_id == conn_id => {
                connections.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.inner.connections.read().await.get(&user_id).cloned()
    }

    /// Send a targeted event to a specific user. Returns false (and drops the
    /// event) when the user has no active connection.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        match self.lookup(user_id).await {
            Some(handle) => {
                handle.notify(event);
                true
            }
            None => false,
        }
    }

    /// Forward a typing signal from `sender_id` to `target_id`.
    pub async fn relay_typing(&self, sender_id: Uuid, target_id: Uuid, typing: bool) -> bool {
        let event = if typing {
            GatewayEvent::Typing { sender_id }
        } else {
            GatewayEvent::StopTyping { sender_id }
        };
        self.send_to_user(target_id, event).await
    }

    /// Announce the current online set after `user_id` connected.
    pub async fn user_online(&self, user_id: Uuid) {
        debug!("{} is online", user_id);
        self.broadcast_online_users().await;
    }

    /// Drop the user's entry and announce it. A stale `conn_id` (a newer
    /// connection has taken over) leaves everything untouched.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) {
        if !self.unregister(user_id, conn_id).await {
            return;
        }
        debug!("{} is offline", user_id);
        self.broadcast_online_users().await;
    }

    /// Ids of every user with an active connection.
    pub async fn online_users(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.inner.connections.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    async fn broadcast_online_users(&self) {
        let user_ids = self.online_users().await;
        self.broadcast(GatewayEvent::OnlineUsers { user_ids });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_lookup_unregister() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();

        assert!(dispatcher.lookup(alice).await.is_none());

        let (conn_id, _rx) = dispatcher.register(alice).await;
        let handle = dispatcher.lookup(alice).await.unwrap();
        assert_eq!(handle.conn_id(), conn_id);
        assert_eq!(dispatcher.online_users().await, vec![alice]);

        assert!(dispatcher.unregister(alice, conn_id).await);
        assert!(dispatcher.lookup(alice).await.is_none());
    }

    #[tokio::test]
    async fn stale_connection_does_not_evict_newer_one() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();

        let (old_conn, _old_rx) = dispatcher.register(alice).await;
        let (new_conn, mut new_rx) = dispatcher.register(alice).await;

        dispatcher.user_offline(alice, old_conn).await;
        let handle = dispatcher.lookup(alice).await.unwrap();
        assert_eq!(handle.conn_id(), new_conn);

        let bob = Uuid::new_v4();
        assert!(dispatcher.relay_typing(bob, alice, true).await);
        assert_eq!(new_rx.try_recv().unwrap(), GatewayEvent::Typing { sender_id: bob });
    }

    #[tokio::test]
    async fn typing_to_absent_user_is_dropped() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (_conn, mut alice_rx) = dispatcher.register(alice).await;

        assert!(!dispatcher.relay_typing(alice, bob, true).await);
        assert!(!dispatcher.relay_typing(alice, bob, false).await);

        // Nothing leaks back to the sender either
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_typing_is_forwarded_verbatim() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (_conn, mut bob_rx) = dispatcher.register(bob).await;

        assert!(dispatcher.relay_typing(alice, bob, false).await);
        assert_eq!(bob_rx.try_recv().unwrap(), GatewayEvent::StopTyping { sender_id: alice });
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn presence_changes_are_broadcast() {
        let dispatcher = Dispatcher::new();
        let mut events = dispatcher.subscribe();
        let alice = Uuid::new_v4();

        let (conn_id, _rx) = dispatcher.register(alice).await;
        dispatcher.user_online(alice).await;
        assert_eq!(
            events.recv().await.unwrap(),
            GatewayEvent::OnlineUsers { user_ids: vec![alice] }
        );

        dispatcher.user_offline(alice, conn_id).await;
        assert_eq!(
            events.recv().await.unwrap(),
            GatewayEvent::OnlineUsers { user_ids: vec![] }
        );
    }
}
