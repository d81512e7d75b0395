//! REST endpoints for conversation management.
//!
//! Conversations are one-to-one between two users. Participant order is
//! normalized in the store (lexicographically smaller user id is always
//! participant_a) to prevent duplicates.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::chat::store;
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::protocol::{Conversation, ServerEvent};

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    /// User id of the other participant.
    pub peer_id: String,
}

/// POST /api/chat/conversations — Create or get a conversation.
/// JWT auth required. Body: { "peer_id": "<user id>" }.
/// Returns the existing conversation if one already exists between the pair.
pub async fn create_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), ChatError> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let peer_id = body.peer_id.clone();

    let (conversation, created) =
        tokio::task::spawn_blocking(move || store::find_or_create_conversation(&db, &user_id, &peer_id))
            .await
            .map_err(|e| ChatError::Persistence(format!("task join: {e}")))??;

    if created {
        // Push to both participants so a peer with the app open sees the
        // conversation appear without polling.
        let event = ServerEvent::ConversationCreated {
            conversation: conversation.clone(),
        };
        if let Some(msg) = event.to_ws_message() {
            state
                .registry
                .send_to_user(&conversation.participant_a, msg.clone());
            state.registry.send_to_user(&conversation.participant_b, msg);
        }
        Ok((StatusCode::CREATED, Json(conversation)))
    } else {
        Ok((StatusCode::OK, Json(conversation)))
    }
}

/// GET /api/chat/conversations — List the authenticated user's conversations,
/// ordered by last activity.
pub async fn list_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<Conversation>>, ChatError> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let conversations = tokio::task::spawn_blocking(move || store::list_conversations(&db, &user_id))
        .await
        .map_err(|e| ChatError::Persistence(format!("task join: {e}")))??;

    Ok(Json(conversations))
}
