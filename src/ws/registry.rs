//! Connection registry: tracks all active WebSocket connections per user.
//!
//! A user can have multiple concurrent connections (multiple devices/tabs),
//! capped at `max_per_user`; the oldest connection is evicted when the cap
//! is exceeded. Presence is derived: a user is online iff they own at least
//! one live connection. There is no persisted presence record to drift from.

use axum::extract::ws::{CloseFrame, Message};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::ws::{ConnectionId, ConnectionSender, CLOSE_EVICTED};

struct ConnectionEntry {
    id: ConnectionId,
    sender: ConnectionSender,
    connected_at: DateTime<Utc>,
}

/// Outcome of a `register` call, used by the actor to drive best-effort
/// presence broadcasts.
#[derive(Debug, PartialEq, Eq)]
pub struct Registered {
    /// True when the user had zero live connections before this one.
    pub went_online: bool,
    /// Connection evicted to stay under the per-user cap, if any.
    pub evicted: Option<ConnectionId>,
}

/// Process-wide registry of live connections. Created once at server start
/// and passed to handlers through `AppState` — mutated only through these
/// methods.
pub struct ConnectionRegistry {
    by_user: DashMap<String, Vec<ConnectionEntry>>,
    by_conn: DashMap<ConnectionId, String>,
    max_per_user: usize,
}

impl ConnectionRegistry {
    pub fn new(max_per_user: usize) -> Self {
        Self {
            by_user: DashMap::new(),
            by_conn: DashMap::new(),
            max_per_user: max_per_user.max(1),
        }
    }

    /// Register a connection for an authenticated user. The userId is fixed
    /// at handshake and never reassigned. When the per-user cap is exceeded,
    /// the oldest connection receives a close frame (4006) and is dropped
    /// from the registry; the eviction never flips observable presence.
    pub fn register(
        &self,
        user_id: &str,
        connection_id: ConnectionId,
        sender: ConnectionSender,
    ) -> Registered {
        self.by_conn.insert(connection_id, user_id.to_string());

        let mut evicted = None;
        let mut entries = self.by_user.entry(user_id.to_string()).or_default();
        let went_online = entries.is_empty();

        entries.push(ConnectionEntry {
            id: connection_id,
            sender,
            connected_at: Utc::now(),
        });

        if entries.len() > self.max_per_user {
            // Entries are pushed in arrival order, so index 0 is the oldest.
            let oldest = entries.remove(0);
            let _ = oldest.sender.send(Message::Close(Some(CloseFrame {
                code: CLOSE_EVICTED,
                reason: "Connection limit reached, oldest connection closed".into(),
            })));
            tracing::info!(
                user_id = %user_id,
                evicted = %oldest.id,
                connected_at = %oldest.connected_at,
                "Connection cap exceeded, evicting oldest"
            );
            evicted = Some(oldest.id);
        }
        drop(entries);

        if let Some(old_id) = evicted {
            self.by_conn.remove(&old_id);
        }

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            "Connection registered"
        );

        Registered {
            went_online,
            evicted,
        }
    }

    /// Unregister a connection. Idempotent: unregistering an absent
    /// connection is a no-op. Returns the owning user and whether this was
    /// their last connection (offline transition).
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<(String, bool)> {
        let (_, user_id) = self.by_conn.remove(&connection_id)?;

        let mut went_offline = false;
        let mut remove_user = false;
        if let Some(mut entries) = self.by_user.get_mut(&user_id) {
            entries.retain(|e| e.id != connection_id);
            if entries.is_empty() {
                went_offline = true;
                remove_user = true;
            }
        }
        if remove_user {
            self.by_user.remove(&user_id);
        }

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            "Connection unregistered"
        );

        Some((user_id, went_offline))
    }

    /// A user is online iff they own at least one live connection.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user
            .get(user_id)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    /// All live connection ids owned by a user.
    pub fn connections_for(&self, user_id: &str) -> Vec<ConnectionId> {
        self.by_user
            .get(user_id)
            .map(|v| v.iter().map(|e| e.id).collect())
            .unwrap_or_default()
    }

    /// Owner of a connection, if it is still registered.
    pub fn user_of(&self, connection_id: ConnectionId) -> Option<String> {
        self.by_conn.get(&connection_id).map(|u| u.clone())
    }

    /// Send a message to one specific connection.
    pub fn send_to_connection(&self, connection_id: ConnectionId, msg: Message) {
        let Some(user_id) = self.user_of(connection_id) else {
            return;
        };
        if let Some(entries) = self.by_user.get(&user_id) {
            if let Some(entry) = entries.iter().find(|e| e.id == connection_id) {
                let _ = entry.sender.send(msg);
            }
        }
    }

    /// Send a message to every connection a user owns.
    pub fn send_to_user(&self, user_id: &str, msg: Message) {
        if let Some(entries) = self.by_user.get(user_id) {
            for entry in entries.iter() {
                let _ = entry.sender.send(msg.clone());
            }
        }
    }

    /// Send a message to a set of connections (delivery fan-out).
    /// Returns the number of connections the message was queued for.
    pub fn send_to_connections(&self, targets: &[ConnectionId], msg: Message) -> usize {
        let mut delivered = 0;
        for conn_id in targets {
            let Some(user_id) = self.user_of(*conn_id) else {
                continue;
            };
            if let Some(entries) = self.by_user.get(&user_id) {
                if let Some(entry) = entries.iter().find(|e| e.id == *conn_id) {
                    if entry.sender.send(msg.clone()).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }
        delivered
    }

    /// Every user with at least one live connection. Feeds the presence
    /// snapshot pushed to each newly connected client.
    pub fn online_users(&self) -> Vec<String> {
        self.by_user.iter().map(|e| e.key().clone()).collect()
    }

    /// Broadcast a message to all connected clients (best-effort, used for
    /// presence transitions).
    pub fn broadcast_to_all(&self, msg: Message) {
        for entry in self.by_user.iter() {
            for conn in entry.value().iter() {
                let _ = conn.sender.send(msg.clone());
            }
        }
    }

}
