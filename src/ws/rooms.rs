//! Room membership index: maps room ids (conversations or communities) to
//! the set of currently subscribed connections.
//!
//! The index keeps a reverse map (connection → rooms) so `leave_all` on
//! connection teardown is the guaranteed cleanup path — there is no TTL or
//! expiry, a dead connection's subscriptions must be removed here or they
//! leak as delivery targets.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::ws::ConnectionId;

pub struct RoomIndex {
    members: DashMap<String, HashSet<ConnectionId>>,
    by_conn: DashMap<ConnectionId, HashSet<String>>,
}

impl Default for RoomIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomIndex {
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
            by_conn: DashMap::new(),
        }
    }

    /// Subscribe a connection to a room. Authorization against the persisted
    /// membership is the caller's responsibility; the index only tracks
    /// live subscriptions.
    pub fn join(&self, connection_id: ConnectionId, room_id: &str) {
        self.members
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id);
        self.by_conn
            .entry(connection_id)
            .or_default()
            .insert(room_id.to_string());
    }

    /// Unsubscribe a connection from a room. No-op if not subscribed.
    pub fn leave(&self, connection_id: ConnectionId, room_id: &str) {
        let mut drop_room = false;
        if let Some(mut set) = self.members.get_mut(room_id) {
            set.remove(&connection_id);
            drop_room = set.is_empty();
        }
        if drop_room {
            self.members.remove(room_id);
        }

        let mut drop_conn = false;
        if let Some(mut set) = self.by_conn.get_mut(&connection_id) {
            set.remove(room_id);
            drop_conn = set.is_empty();
        }
        if drop_conn {
            self.by_conn.remove(&connection_id);
        }
    }

    /// Remove every subscription a connection holds. Invoked on connection
    /// teardown; the only way subscriptions for a dead connection are
    /// guaranteed removed.
    pub fn leave_all(&self, connection_id: ConnectionId) {
        let rooms = match self.by_conn.remove(&connection_id) {
            Some((_, rooms)) => rooms,
            None => return,
        };
        for room_id in rooms {
            let mut drop_room = false;
            if let Some(mut set) = self.members.get_mut(&room_id) {
                set.remove(&connection_id);
                drop_room = set.is_empty();
            }
            if drop_room {
                self.members.remove(&room_id);
            }
        }
    }

    /// Currently subscribed connections. Unknown rooms yield an empty set,
    /// never an error.
    pub fn members_of(&self, room_id: &str) -> HashSet<ConnectionId> {
        self.members
            .get(room_id)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Whether a connection is currently subscribed to a room.
    pub fn is_subscribed(&self, connection_id: ConnectionId, room_id: &str) -> bool {
        self.by_conn
            .get(&connection_id)
            .map(|s| s.contains(room_id))
            .unwrap_or(false)
    }

    /// Actively revoke a set of connections' subscription to one room,
    /// used when a user's room authorization is withdrawn (removed from a
    /// community) while their sockets are still up.
    pub fn revoke(&self, room_id: &str, connection_ids: &[ConnectionId]) {
        for conn_id in connection_ids {
            self.leave(*conn_id, room_id);
        }
    }

    /// Rooms a connection is subscribed to.
    pub fn rooms_of(&self, connection_id: ConnectionId) -> HashSet<String> {
        self.by_conn
            .get(&connection_id)
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn join_and_members_of() {
        let rooms = RoomIndex::new();
        let c1 = Uuid::now_v7();
        let c2 = Uuid::now_v7();

        rooms.join(c1, "r1");
        rooms.join(c2, "r1");
        rooms.join(c1, "r2");

        assert_eq!(rooms.members_of("r1").len(), 2);
        assert_eq!(rooms.members_of("r2"), HashSet::from([c1]));
    }

    #[test]
    fn unknown_room_is_empty_not_error() {
        let rooms = RoomIndex::new();
        assert!(rooms.members_of("nope").is_empty());
    }

    #[test]
    fn leave_all_cascades() {
        let rooms = RoomIndex::new();
        let c1 = Uuid::now_v7();
        let c2 = Uuid::now_v7();
        rooms.join(c1, "r1");
        rooms.join(c1, "r2");
        rooms.join(c2, "r1");

        rooms.leave_all(c1);

        assert_eq!(rooms.members_of("r1"), HashSet::from([c2]));
        assert!(rooms.members_of("r2").is_empty());
        assert!(rooms.rooms_of(c1).is_empty());
    }

    #[test]
    fn revoke_removes_only_named_connections() {
        let rooms = RoomIndex::new();
        let c1 = Uuid::now_v7();
        let c2 = Uuid::now_v7();
        rooms.join(c1, "r1");
        rooms.join(c2, "r1");

        rooms.revoke("r1", &[c1]);

        assert_eq!(rooms.members_of("r1"), HashSet::from([c2]));
        assert!(!rooms.is_subscribed(c1, "r1"));
        assert!(rooms.is_subscribed(c2, "r1"));
    }

    #[test]
    fn leave_is_idempotent() {
        let rooms = RoomIndex::new();
        let c1 = Uuid::now_v7();
        rooms.join(c1, "r1");
        rooms.leave(c1, "r1");
        rooms.leave(c1, "r1");
        assert!(rooms.members_of("r1").is_empty());
    }
}
