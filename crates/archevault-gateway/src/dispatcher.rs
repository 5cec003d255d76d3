use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::error;
use uuid::Uuid;

use archevault_types::events::GatewayEvent;
use archevault_types::models::PresenceStatus;

/// A gateway event serialized once for every receiver.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Set for room-scoped events; connections not subscribed to the room skip it.
    pub room_id: Option<Uuid>,
    pub json: Arc<str>,
}

/// Manages all connected clients and broadcasts events.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for gateway events; each connection filters by room
    broadcast_tx: broadcast::Sender<Outbound>,

    /// Track online users: user_id -> presence
    online_users: RwLock<HashMap<Uuid, PresenceStatus>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
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
                online_users: RwLock::new(HashMap::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize gateway event: {}", e);
                return;
            }
        };
        let _ = self.inner.broadcast_tx.send(Outbound {
            room_id: event.room_id(),
            json: json.into(),
        });
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some((stored_conn_id, _)) = channels.get(&user_id)
            && *stored_conn_id == conn_id
        {
            channels.remove(&user_id);
        }
    }

    /// Send a targeted event to a specific user, if connected.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    /// Register a user as online.
    pub async fn user_online(&self, user_id: Uuid) {
        self.set_presence(user_id, PresenceStatus::Online).await;
    }

    /// Record and broadcast a presence change. Offline removes the user
    /// from the online set.
    pub async fn set_presence(&self, user_id: Uuid, status: PresenceStatus) {
        {
            let mut online = self.inner.online_users.write().await;
            if status == PresenceStatus::Offline {
                online.remove(&user_id);
            } else {
                online.insert(user_id, status);
            }
        }

        self.broadcast(GatewayEvent::PresenceUpdate { user_id, status });
    }

    /// Register a user as offline. Only cleans up if conn_id matches.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) {
        // Only clean up if this connection still owns the user channel
        let is_current = {
            let channels = self.inner.user_channels.read().await;
            channels
                .get(&user_id)
                .is_some_and(|(cid, _)| *cid == conn_id)
        };

        if !is_current {
            // A newer connection has taken over; leave everything alone
            return;
        }

        self.unregister_user_channel(user_id, conn_id).await;
        self.set_presence(user_id, PresenceStatus::Offline).await;
    }

    /// Get list of online users with their presence.
    pub async fn online_users(&self) -> Vec<(Uuid, PresenceStatus)> {
        self.inner
            .online_users
            .read()
            .await
            .iter()
            .map(|(id, status)| (*id, *status))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_tags_room_scope() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let room_id = Uuid::new_v4();

        dispatcher.broadcast(GatewayEvent::TypingStart {
            room_id,
            user_id: Uuid::new_v4(),
        });

        let out = rx.recv().await.unwrap();
        assert_eq!(out.room_id, Some(room_id));
        assert!(out.json.contains("TypingStart"));
    }

    #[tokio::test]
    async fn presence_follows_last_event() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        dispatcher.user_online(user).await;
        dispatcher.set_presence(user, PresenceStatus::Dnd).await;
        assert_eq!(dispatcher.online_users().await, vec![(user, PresenceStatus::Dnd)]);

        dispatcher.set_presence(user, PresenceStatus::Offline).await;
        assert!(dispatcher.online_users().await.is_empty());
    }

    #[tokio::test]
    async fn stale_connection_does_not_take_user_offline() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (old_conn, _old_rx) = dispatcher.register_user_channel(user).await;
        let (_new_conn, mut new_rx) = dispatcher.register_user_channel(user).await;
        dispatcher.user_online(user).await;

        dispatcher.user_offline(user, old_conn).await;
        assert_eq!(dispatcher.online_users().await.len(), 1);

        dispatcher
            .send_to_user(user, GatewayEvent::PresenceUpdate {
                user_id: user,
                status: PresenceStatus::Away,
            })
            .await;
        assert!(new_rx.try_recv().is_ok());
    }
}
