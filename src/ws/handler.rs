use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::chat::store;
use crate::state::AppState;
use crate::ws::{actor, CLOSE_SUSPENDED, CLOSE_TOKEN_EXPIRED, CLOSE_TOKEN_INVALID};

/// Query parameters for WebSocket connection. Auth is via query param
/// ?token=JWT — browsers cannot set headers on WebSocket upgrades.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// Bound on the post-token account-status lookup; a handshake that cannot
/// finish authenticating within this window is dropped.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates via query parameter.
/// On auth failure, upgrades then immediately closes with appropriate close code.
/// On success, spawns an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match jwt::validate_access_token(&state.jwt_secret, &params.token) {
        Ok(claims) => claims,
        Err(err) => {
            let (close_code, reason) = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };

            tracing::warn!(
                close_code = close_code,
                reason = reason,
                "WebSocket auth failed"
            );
            return ws.on_upgrade(move |socket| close_with(socket, close_code, reason));
        }
    };

    // The user's account status is checked at connect time only, never
    // continuously. Suspended/blocked users are refused.
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let status = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        tokio::task::spawn_blocking(move || store::user_status(&db, &user_id)),
    )
    .await;

    let (close_code, reason) = match status {
        Ok(Ok(Ok(Some(status)))) if status == "active" => {
            tracing::info!(
                user_id = %claims.sub,
                role = %claims.role,
                "WebSocket connection authenticated"
            );
            let user_id = claims.sub;
            return ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id));
        }
        Ok(Ok(Ok(Some(_)))) => (CLOSE_SUSPENDED, "Account suspended"),
        Ok(Ok(Ok(None))) => (CLOSE_TOKEN_INVALID, "Unknown user"),
        Ok(Ok(Err(_))) | Ok(Err(_)) => (CLOSE_TOKEN_INVALID, "Authentication failed"),
        Err(_) => (CLOSE_TOKEN_INVALID, "Authentication timed out"),
    };

    tracing::warn!(
        user_id = %claims.sub,
        close_code = close_code,
        reason = reason,
        "WebSocket handshake refused"
    );
    ws.on_upgrade(move |socket| close_with(socket, close_code, reason))
}

/// Upgrade the connection, then immediately close with the error code.
async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let close_frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(close_frame))).await;
}
