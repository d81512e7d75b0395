use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::state::AppState;
use crate::ws::protocol::{self, ServerEvent};
use crate::ws::ConnectionId;

/// Ping interval: server sends WebSocket ping every 30 seconds.
/// Prevents connection leaks from abrupt disconnects.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming events, dispatches to protocol handlers
///
/// Each inbound event is handled to completion (persistence included) before
/// the next frame from this connection is read, which is what preserves
/// per-sender delivery order. Events from other connections interleave
/// freely.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let connection_id: ConnectionId = Uuid::now_v7();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let registered = state.registry.register(&user_id, connection_id, tx.clone());

    // Best-effort presence broadcast on the offline -> online transition
    if registered.went_online {
        if let Some(msg) = (ServerEvent::Presence {
            user_id: user_id.clone(),
            online: true,
        })
        .to_ws_message()
        {
            state.registry.broadcast_to_all(msg);
        }
    }

    // Confirm the handshake to the client
    if let Some(msg) = (ServerEvent::Connected {
        user_id: user_id.clone(),
    })
    .to_ws_message()
    {
        let _ = tx.send(msg);
    }

    // Send the current online set to the newly connected client; from here
    // on it only sees presence transitions.
    for online_id in state.registry.online_users() {
        if online_id == user_id {
            continue;
        }
        if let Some(msg) = (ServerEvent::Presence {
            user_id: online_id,
            online: true,
        })
        .to_ws_message()
        {
            let _ = tx.send(msg);
        }
    }

    tracing::info!(
        user_id = %user_id,
        connection_id = %connection_id,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text(&text, connection_id, &user_id, &state).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(
                        user_id = %user_id,
                        "Received binary frame (protocol is JSON text), ignoring"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks
    writer_handle.abort();
    ping_handle.abort();

    // Subscriptions do not survive the connection; leave_all is the
    // guaranteed cleanup path for delivery targets.
    state.rooms.leave_all(connection_id);

    let went_offline = state
        .registry
        .unregister(connection_id)
        .map(|(_, offline)| offline)
        .unwrap_or(false);

    // Best-effort presence broadcast only when this was the last connection
    if went_offline {
        if let Some(msg) = (ServerEvent::Presence {
            user_id: user_id.clone(),
            online: false,
        })
        .to_ws_message()
        {
            state.registry.broadcast_to_all(msg);
        }
    }

    tracing::info!(
        user_id = %user_id,
        connection_id = %connection_id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}
