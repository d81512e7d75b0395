//! REST endpoint for message history.
//!
//! One endpoint serves both room kinds: the room id is resolved to a
//! conversation or a community server-side. History is the catch-up path
//! for clients that were offline; sockets never replay missed messages.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::store::{self, ResolvedRoom};
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::protocol::ChatMessage;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    /// Return messages with server_sequence strictly below this cursor.
    pub before: Option<u64>,
    /// Page size, capped server-side.
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Newest first; paginate with `before` = the last entry's sequence.
    pub messages: Vec<ChatMessage>,
    pub has_more: bool,
}

/// GET /api/chat/messages/{room_id}?before=<seq>&limit=<n> — Paginated
/// history for a conversation or community. JWT auth required; the caller
/// must be a participant or member of the room.
pub async fn get_history(
    State(state): State<AppState>,
    claims: Claims,
    Path(room_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ChatError> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let (messages, has_more) = tokio::task::spawn_blocking(move || {
        let resolved = store::resolve_room(&db, &room_id)?
            .ok_or_else(|| ChatError::NotFound(format!("room {room_id}")))?;

        match resolved {
            ResolvedRoom::Direct {
                participant_a,
                participant_b,
            } => {
                if user_id != participant_a && user_id != participant_b {
                    return Err(ChatError::Authorization(
                        "not a participant in this conversation".to_string(),
                    ));
                }
                store::direct_history(&db, &room_id, params.before, params.limit)
            }
            ResolvedRoom::Community => {
                if !store::is_community_member(&db, &room_id, &user_id)? {
                    return Err(ChatError::Authorization(
                        "not a member of this community".to_string(),
                    ));
                }
                store::community_history(&db, &room_id, params.before, params.limit)
            }
        }
    })
    .await
    .map_err(|e| ChatError::Persistence(format!("task join: {e}")))??;

    Ok(Json(HistoryResponse { messages, has_more }))
}
