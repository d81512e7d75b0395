//! Local message cache with optimistic-send reconciliation.
//!
//! The UI renders from this cache. Sends appear immediately as pending
//! entries keyed by their temp id; the server's ack (a new_message event
//! carrying the same temp id back) replaces the pending entry with the
//! authoritative copy. History pages merge in by message id so socket
//! delivery and catch-up fetches never produce duplicates.

use std::collections::HashMap;

use crate::ws::protocol::ChatMessage;

#[derive(Debug, Clone)]
pub struct CachedMessage {
    pub message: ChatMessage,
    /// True for optimistic local copies not yet acked by the server.
    pub pending: bool,
}

#[derive(Debug, Default)]
pub struct ChatCache {
    rooms: HashMap<String, Vec<CachedMessage>>,
}

impl ChatCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an optimistic local copy of an outgoing message. The temp id
    /// doubles as the message id until the ack arrives.
    pub fn add_optimistic(&mut self, message: ChatMessage) {
        let room = self.rooms.entry(message.room_id.clone()).or_default();
        room.push(CachedMessage {
            message,
            pending: true,
        });
    }

    /// Apply a new_message event. If it carries a temp id it is the ack for
    /// one of our own sends and replaces the pending copy; otherwise it is
    /// inserted in sequence order, creating the room entry if this is the
    /// first we hear of the room. Duplicate ids are dropped.
    pub fn apply_new_message(&mut self, message: ChatMessage, temp_id: Option<&str>) {
        let room = self.rooms.entry(message.room_id.clone()).or_default();

        if let Some(temp_id) = temp_id {
            if let Some(entry) = room
                .iter_mut()
                .find(|m| m.pending && m.message.id == temp_id)
            {
                entry.message = message;
                entry.pending = false;
                Self::sort_room(room);
                return;
            }
        }

        if room.iter().any(|m| m.message.id == message.id) {
            return;
        }

        room.push(CachedMessage {
            message,
            pending: false,
        });
        Self::sort_room(room);
    }

    /// Merge a history page (any order) into the room. Used for catch-up
    /// after reconnect; ids already present are skipped.
    pub fn apply_history(&mut self, room_id: &str, page: Vec<ChatMessage>) {
        let room = self.rooms.entry(room_id.to_string()).or_default();
        for message in page {
            if room.iter().any(|m| m.message.id == message.id) {
                continue;
            }
            room.push(CachedMessage {
                message,
                pending: false,
            });
        }
        Self::sort_room(room);
    }

    /// Messages for a room in display order: acked messages by sequence,
    /// pending sends after them in send order.
    pub fn messages(&self, room_id: &str) -> &[CachedMessage] {
        self.rooms.get(room_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn room_ids(&self) -> impl Iterator<Item = &String> {
        self.rooms.keys()
    }

    /// Highest acked sequence seen for a room, the cursor for catch-up.
    pub fn latest_sequence(&self, room_id: &str) -> Option<u64> {
        self.rooms.get(room_id).and_then(|room| {
            room.iter()
                .filter(|m| !m.pending)
                .map(|m| m.message.server_sequence)
                .max()
        })
    }

    fn sort_room(room: &mut [CachedMessage]) {
        // Pending entries carry sequence 0 but sort last, preserving their
        // relative send order.
        room.sort_by_key(|m| {
            if m.pending {
                (1u8, u64::MAX, m.message.created_at.clone())
            } else {
                (0u8, m.message.server_sequence, m.message.created_at.clone())
            }
        });
    }
}
