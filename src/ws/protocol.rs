//! JSON wire protocol and event dispatch.
//!
//! Frames are text messages of the form `{"event": "...", "data": {...}}`.
//! Unknown event names are logged and ignored rather than disconnecting the
//! client; malformed JSON gets an `error` event with code 400.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::chat::store::{self, ResolvedRoom};
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::{router, ConnectionId};

/// Which kind of room a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Direct,
    Community,
}

/// A message as it travels over the wire and as REST history returns it.
/// Immutable once created; `server_sequence` is per-room and drives history
/// pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub room_kind: RoomKind,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    pub attachments: Vec<String>,
    /// "USER" for chat messages, "ACTION" for membership notices.
    pub message_type: String,
    pub server_sequence: u64,
    pub created_at: String,
}

/// A direct conversation as pushed to clients and returned by REST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub participant_a_name: String,
    pub participant_b_name: String,
    pub created_at: String,
    pub last_message_at: Option<String>,
}

/// Events a client may send.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage {
        room_id: String,
        body: String,
        #[serde(default)]
        attachments: Vec<String>,
        temp_id: String,
    },
    JoinRoom {
        room_id: String,
    },
    LeaveRoom {
        room_id: String,
    },
    Typing {
        room_id: String,
    },
}

/// Events the server pushes.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        user_id: String,
    },
    NewMessage {
        message: ChatMessage,
        /// Present only on the ack sent to the originating connection,
        /// correlating the client's optimistic copy with the server id.
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },
    ConversationCreated {
        conversation: Conversation,
    },
    RoomJoined {
        room_id: String,
    },
    RoomLeft {
        room_id: String,
    },
    Typing {
        room_id: String,
        user_id: String,
    },
    Presence {
        user_id: String,
        online: bool,
    },
    MemberAdded {
        community_id: String,
        user_id: String,
    },
    Error {
        code: u16,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },
}

impl ServerEvent {
    /// Encode as a WebSocket text frame. Serialization of these enums
    /// cannot fail in practice; a failure is logged and yields no frame.
    pub fn to_ws_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode server event");
                None
            }
        }
    }
}

/// Send an event to one connection.
pub fn send_to_connection(state: &AppState, conn_id: ConnectionId, event: &ServerEvent) {
    if let Some(msg) = event.to_ws_message() {
        state.registry.send_to_connection(conn_id, msg);
    }
}

/// Send an error event to one connection.
fn send_error(state: &AppState, conn_id: ConnectionId, err: &ChatError, temp_id: Option<String>) {
    send_to_connection(
        state,
        conn_id,
        &ServerEvent::Error {
            code: err.wire_code(),
            message: err.to_string(),
            temp_id,
        },
    );
}

/// Handle an incoming text frame: decode and dispatch.
pub async fn handle_text(text: &str, conn_id: ConnectionId, user_id: &str, state: &AppState) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(_) => {
            // Distinguish unknown-but-well-formed events (ignore) from
            // malformed frames (error back to the client).
            match serde_json::from_str::<serde_json::Value>(text) {
                Ok(value) if value.get("event").is_some() => {
                    tracing::debug!(
                        user_id = %user_id,
                        event = %value["event"],
                        "Ignoring unknown event type"
                    );
                }
                _ => {
                    send_error(
                        state,
                        conn_id,
                        &ChatError::Malformed("invalid event frame".to_string()),
                        None,
                    );
                }
            }
            return;
        }
    };

    match event {
        ClientEvent::SendMessage {
            room_id,
            body,
            attachments,
            temp_id,
        } => handle_send_message(state, conn_id, user_id, room_id, body, attachments, temp_id).await,
        ClientEvent::JoinRoom { room_id } => {
            handle_join_room(state, conn_id, user_id, room_id).await
        }
        ClientEvent::LeaveRoom { room_id } => handle_leave_room(state, conn_id, room_id),
        ClientEvent::Typing { room_id } => handle_typing(state, conn_id, user_id, room_id),
    }
}

/// Persist a message, ack the sender, fan out to recipients.
/// Persistence completes (or fails back to the sender) before fan-out.
async fn handle_send_message(
    state: &AppState,
    conn_id: ConnectionId,
    user_id: &str,
    room_id: String,
    body: String,
    attachments: Vec<String>,
    temp_id: String,
) {
    let db = state.db.clone();
    let sender = user_id.to_string();
    let room = room_id.clone();

    let result = tokio::task::spawn_blocking(move || {
        let resolved = store::resolve_room(&db, &room)?
            .ok_or_else(|| ChatError::NotFound(room.clone()))?;

        match resolved {
            ResolvedRoom::Direct {
                participant_a,
                participant_b,
            } => {
                if sender != participant_a && sender != participant_b {
                    return Err(ChatError::Authorization(
                        "not a participant in this conversation".to_string(),
                    ));
                }
                let peer = if sender == participant_a {
                    participant_b
                } else {
                    participant_a
                };
                let message = store::create_direct_message(&db, &room, &sender, &body, &attachments)?;
                Ok((message, Some(peer)))
            }
            ResolvedRoom::Community => {
                if !store::is_community_member(&db, &room, &sender)? {
                    return Err(ChatError::Authorization(
                        "not a member of this community".to_string(),
                    ));
                }
                let message =
                    store::create_community_message(&db, &room, &sender, &body, &attachments, "USER")?;
                Ok((message, None))
            }
        }
    })
    .await
    .map_err(|e| ChatError::Persistence(format!("task join: {e}")))
    .and_then(|r| r);

    let (message, peer) = match result {
        Ok(ok) => ok,
        Err(err) => {
            tracing::warn!(
                user_id = %user_id,
                room_id = %room_id,
                error = %err,
                "send_message rejected"
            );
            send_error(state, conn_id, &err, Some(temp_id));
            return;
        }
    };

    // Ack to the originating connection, correlating the client temp id
    // with the server-assigned message id.
    send_to_connection(
        state,
        conn_id,
        &ServerEvent::NewMessage {
            message: message.clone(),
            temp_id: Some(temp_id),
        },
    );

    let event = ServerEvent::NewMessage {
        message,
        temp_id: None,
    };
    let Some(msg) = event.to_ws_message() else {
        return;
    };

    let delivered = match peer {
        Some(peer_user_id) => router::deliver_direct(&state.registry, &peer_user_id, msg),
        None => router::deliver_community(&state.registry, &state.rooms, &room_id, user_id, msg),
    };
    tracing::debug!(
        user_id = %user_id,
        room_id = %room_id,
        delivered = delivered,
        "Message fanned out"
    );
}

/// Subscribe the connection to a room after checking the persisted
/// membership. A subscription must always be a subset of rooms the owning
/// user is authorized to join.
async fn handle_join_room(state: &AppState, conn_id: ConnectionId, user_id: &str, room_id: String) {
    let db = state.db.clone();
    let user = user_id.to_string();
    let room = room_id.clone();

    let authorized = tokio::task::spawn_blocking(move || {
        let resolved = store::resolve_room(&db, &room)?
            .ok_or_else(|| ChatError::NotFound(room.clone()))?;
        match resolved {
            ResolvedRoom::Direct {
                participant_a,
                participant_b,
            } => Ok(user == participant_a || user == participant_b),
            ResolvedRoom::Community => store::is_community_member(&db, &room, &user),
        }
    })
    .await
    .map_err(|e| ChatError::Persistence(format!("task join: {e}")))
    .and_then(|r| r);

    match authorized {
        Ok(true) => {
            state.rooms.join(conn_id, &room_id);
            send_to_connection(state, conn_id, &ServerEvent::RoomJoined { room_id });
        }
        Ok(false) => {
            send_error(
                state,
                conn_id,
                &ChatError::Authorization("not a member of this room".to_string()),
                None,
            );
        }
        Err(err) => send_error(state, conn_id, &err, None),
    }
}

fn handle_leave_room(state: &AppState, conn_id: ConnectionId, room_id: String) {
    state.rooms.leave(conn_id, &room_id);
    send_to_connection(state, conn_id, &ServerEvent::RoomLeft { room_id });
}

/// Typing indicators are best-effort and never persisted: fan out to the
/// room's subscribers minus the sender's own connections. A typing event
/// for a room the connection is not subscribed to is silently dropped.
fn handle_typing(state: &AppState, conn_id: ConnectionId, user_id: &str, room_id: String) {
    if !state.rooms.is_subscribed(conn_id, &room_id) {
        return;
    }
    let event = ServerEvent::Typing {
        room_id: room_id.clone(),
        user_id: user_id.to_string(),
    };
    if let Some(msg) = event.to_ws_message() {
        router::deliver_community(&state.registry, &state.rooms, &room_id, user_id, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_decodes_wire_shape() {
        let frame = r#"{"event":"send_message","data":{"room_id":"c1","body":"hi","temp_id":"t1"}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        match event {
            ClientEvent::SendMessage {
                room_id,
                body,
                attachments,
                temp_id,
            } => {
                assert_eq!(room_id, "c1");
                assert_eq!(body, "hi");
                assert!(attachments.is_empty());
                assert_eq!(temp_id, "t1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn ack_serializes_temp_id_and_fanout_omits_it() {
        let message = ChatMessage {
            id: "m1".to_string(),
            room_id: "c1".to_string(),
            room_kind: RoomKind::Direct,
            sender_id: "alice".to_string(),
            sender_name: "Alice".to_string(),
            body: "hi".to_string(),
            attachments: vec![],
            message_type: "USER".to_string(),
            server_sequence: 1,
            created_at: "2026-01-01 00:00:00".to_string(),
        };

        let ack = ServerEvent::NewMessage {
            message: message.clone(),
            temp_id: Some("t1".to_string()),
        };
        let json = serde_json::to_string(&ack).unwrap();
        assert!(json.contains("\"temp_id\":\"t1\""));

        let fanout = ServerEvent::NewMessage {
            message,
            temp_id: None,
        };
        let json = serde_json::to_string(&fanout).unwrap();
        assert!(!json.contains("temp_id"));
    }
}
