//! Resilient client session over a WebSocket connection.
//!
//! The session owns the socket on a background task. It reconnects with
//! capped exponential backoff, re-joins subscribed rooms after every
//! reconnect, and queues outgoing sends while offline. Incoming events
//! update the shared [`ChatCache`] before being forwarded to the app.

use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

use crate::client::backoff::Backoff;
use crate::client::cache::ChatCache;
use crate::ws::protocol::{ChatMessage, ClientEvent, RoomKind, ServerEvent};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:4100/ws`.
    pub server_url: String,
    /// Access token appended as the `token` query parameter.
    pub token: String,
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug)]
enum Command {
    Send(ClientEvent),
    Join(String),
    Leave(String),
    Shutdown,
}

/// Handle to a running session. Dropping it shuts the session down.
pub struct ClientSession {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    cache: Arc<Mutex<ChatCache>>,
    config: SessionConfig,
}

impl ClientSession {
    /// Connect in the background and return immediately. The first
    /// connection attempt follows the same backoff as reconnects.
    pub fn spawn(config: SessionConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let cache = Arc::new(Mutex::new(ChatCache::new()));

        let task_config = config.clone();
        let task_cache = cache.clone();
        tokio::spawn(run_session(task_config, cmd_rx, event_tx, task_cache));

        Self {
            cmd_tx,
            events,
            cache,
            config,
        }
    }

    /// Send a message optimistically. The returned temp id names the local
    /// copy until the server ack replaces it.
    pub fn send_message(
        &self,
        room_id: &str,
        room_kind: RoomKind,
        body: &str,
        attachments: Vec<String>,
    ) -> String {
        let temp_id = Uuid::now_v7().to_string();

        if let Ok(mut cache) = self.cache.lock() {
            cache.add_optimistic(ChatMessage {
                id: temp_id.clone(),
                room_id: room_id.to_string(),
                room_kind,
                sender_id: self.config.user_id.clone(),
                sender_name: self.config.display_name.clone(),
                body: body.to_string(),
                attachments: attachments.clone(),
                message_type: "USER".to_string(),
                server_sequence: 0,
                created_at: String::new(),
            });
        }

        let _ = self.cmd_tx.send(Command::Send(ClientEvent::SendMessage {
            room_id: room_id.to_string(),
            body: body.to_string(),
            attachments,
            temp_id: temp_id.clone(),
        }));
        temp_id
    }

    pub fn join_room(&self, room_id: &str) {
        let _ = self.cmd_tx.send(Command::Join(room_id.to_string()));
    }

    pub fn leave_room(&self, room_id: &str) {
        let _ = self.cmd_tx.send(Command::Leave(room_id.to_string()));
    }

    pub fn typing(&self, room_id: &str) {
        let _ = self.cmd_tx.send(Command::Send(ClientEvent::Typing {
            room_id: room_id.to_string(),
        }));
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }

    /// Next server event, None once the session has shut down.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    pub fn cache(&self) -> Arc<Mutex<ChatCache>> {
        self.cache.clone()
    }
}

/// Close codes the server uses to refuse a session outright (expired token,
/// invalid token, suspended account). Everything else is treated as
/// transient and re-enters the backoff loop.
fn is_auth_close(code: u16) -> bool {
    matches!(
        code,
        crate::ws::CLOSE_TOKEN_EXPIRED | crate::ws::CLOSE_TOKEN_INVALID | crate::ws::CLOSE_SUSPENDED
    )
}

fn encode(event: &ClientEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode client event");
            None
        }
    }
}

async fn run_session(
    config: SessionConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    cache: Arc<Mutex<ChatCache>>,
) {
    let url = format!("{}?token={}", config.server_url, config.token);
    let mut backoff = Backoff::new();
    let mut joined_rooms: HashSet<String> = HashSet::new();
    let mut outbox: Vec<ClientEvent> = Vec::new();

    loop {
        let (mut stream, _) = match connect_async(url.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(error = %e, ?delay, "Connection failed, retrying");
                sleep(delay).await;
                continue;
            }
        };
        backoff.reset();
        tracing::info!("Connected");

        // Restore room subscriptions the server forgot when the previous
        // connection dropped.
        for room_id in &joined_rooms {
            if let Some(msg) = encode(&ClientEvent::JoinRoom {
                room_id: room_id.clone(),
            }) {
                let _ = stream.send(msg).await;
            }
        }
        // Flush sends queued while offline, in order.
        for event in outbox.drain(..) {
            if let Some(msg) = encode(&event) {
                let _ = stream.send(msg).await;
            }
        }

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let cmd = match cmd {
                        Some(cmd) => cmd,
                        None => return,
                    };
                    match cmd {
                        Command::Shutdown => {
                            let _ = stream.send(Message::Close(None)).await;
                            return;
                        }
                        Command::Join(room_id) => {
                            joined_rooms.insert(room_id.clone());
                            if let Some(msg) = encode(&ClientEvent::JoinRoom { room_id }) {
                                let _ = stream.send(msg).await;
                            }
                        }
                        Command::Leave(room_id) => {
                            joined_rooms.remove(&room_id);
                            if let Some(msg) = encode(&ClientEvent::LeaveRoom { room_id }) {
                                let _ = stream.send(msg).await;
                            }
                        }
                        Command::Send(event) => {
                            match encode(&event) {
                                Some(msg) => {
                                    if stream.send(msg).await.is_err() {
                                        // Connection died mid-send; requeue
                                        // and reconnect.
                                        outbox.push(event);
                                        break;
                                    }
                                }
                                None => {}
                            }
                        }
                    }
                }
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerEvent>(text.as_str()) {
                                Ok(event) => {
                                    handle_server_event(&event, &cache, &mut joined_rooms);
                                    if event_tx.send(event).is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    tracing::debug!(error = %e, "Ignoring unrecognized frame");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = stream.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            if let Some(frame) = &frame {
                                let code = u16::from(frame.code);
                                // Auth rejections are terminal: retrying with
                                // the same token can never succeed. Surface
                                // the refusal and stop instead of looping.
                                if is_auth_close(code) {
                                    tracing::error!(
                                        code,
                                        reason = %frame.reason,
                                        "Server refused the session, not reconnecting"
                                    );
                                    let _ = event_tx.send(ServerEvent::Error {
                                        code,
                                        message: frame.reason.to_string(),
                                        temp_id: None,
                                    });
                                    return;
                                }
                            }
                            tracing::info!(?frame, "Server closed the connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Socket error");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        let delay = backoff.next_delay();
        tracing::info!(?delay, "Disconnected, reconnecting");
        sleep(delay).await;
    }
}

fn handle_server_event(
    event: &ServerEvent,
    cache: &Arc<Mutex<ChatCache>>,
    joined_rooms: &mut HashSet<String>,
) {
    match event {
        ServerEvent::NewMessage { message, temp_id } => {
            if let Ok(mut cache) = cache.lock() {
                cache.apply_new_message(message.clone(), temp_id.as_deref());
            }
        }
        // The server revoked our subscription (removed from a community);
        // do not re-join it on reconnect.
        ServerEvent::RoomLeft { room_id } => {
            joined_rooms.remove(room_id);
        }
        _ => {}
    }
}
