//! REST endpoints for community membership.
//!
//! Membership changes leave an ACTION message in the community's history so
//! every client, live or catching up later, sees the same timeline. Removal
//! also revokes the removed user's live room subscriptions so they stop
//! receiving fan-out immediately.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::chat::store;
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::protocol::{ChatMessage, ServerEvent};
use crate::ws::router;

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: String,
}

/// Owner check shared by both membership endpoints. Blocking; call from
/// spawn_blocking.
fn require_owner(
    db: &crate::db::DbPool,
    community_id: &str,
    user_id: &str,
) -> Result<(), ChatError> {
    let owner = store::community_owner(db, community_id)?
        .ok_or_else(|| ChatError::NotFound(format!("community {community_id}")))?;
    if owner != user_id {
        return Err(ChatError::Authorization(
            "only the community owner can manage members".to_string(),
        ));
    }
    Ok(())
}

fn fan_out_action(state: &AppState, community_id: &str, notice: &ChatMessage) {
    let event = ServerEvent::NewMessage {
        message: notice.clone(),
        temp_id: None,
    };
    if let Some(msg) = event.to_ws_message() {
        router::deliver_community(
            &state.registry,
            &state.rooms,
            community_id,
            &notice.sender_id,
            msg,
        );
    }
}

/// POST /api/communities/{id}/members — Add a member. Owner only.
/// Idempotent: adding an existing member is a no-op 200.
pub async fn add_member(
    State(state): State<AppState>,
    claims: Claims,
    Path(community_id): Path<String>,
    Json(body): Json<AddMemberRequest>,
) -> Result<StatusCode, ChatError> {
    let db = state.db.clone();
    let caller = claims.sub.clone();
    let target = body.user_id.clone();
    let community = community_id.clone();

    let notice = tokio::task::spawn_blocking(move || {
        require_owner(&db, &community, &caller)?;
        if !store::add_member(&db, &community, &target)? {
            return Ok::<_, ChatError>(None);
        }
        // The added user is the sender of the notice; clients render the
        // body alongside sender_name.
        let notice = store::create_community_message(
            &db,
            &community,
            &target,
            "joined the community",
            &[],
            "ACTION",
        )?;
        Ok(Some(notice))
    })
    .await
    .map_err(|e| ChatError::Persistence(format!("task join: {e}")))??;

    let Some(notice) = notice else {
        return Ok(StatusCode::OK);
    };

    fan_out_action(&state, &community_id, &notice);

    // Tell the added user directly; they are not subscribed to the room yet.
    let event = ServerEvent::MemberAdded {
        community_id: community_id.clone(),
        user_id: body.user_id.clone(),
    };
    if let Some(msg) = event.to_ws_message() {
        state.registry.send_to_user(&body.user_id, msg);
    }

    Ok(StatusCode::CREATED)
}

/// DELETE /api/communities/{id}/members/{user_id} — Remove a member. The
/// owner can remove anyone; any member can remove themselves (leave). The
/// owner cannot leave their own community.
pub async fn remove_member(
    State(state): State<AppState>,
    claims: Claims,
    Path((community_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, ChatError> {
    let db = state.db.clone();
    let caller = claims.sub.clone();
    let target = user_id.clone();
    let community = community_id.clone();

    let notice = tokio::task::spawn_blocking(move || {
        let owner = store::community_owner(&db, &community)?
            .ok_or_else(|| ChatError::NotFound(format!("community {community}")))?;
        if target == owner {
            return Err(ChatError::Malformed(
                "the owner cannot be removed from their community".to_string(),
            ));
        }
        if caller != owner && caller != target {
            return Err(ChatError::Authorization(
                "only the community owner can remove other members".to_string(),
            ));
        }
        if !store::remove_member(&db, &community, &target)? {
            return Err(ChatError::NotFound(format!(
                "user {target} is not a member of community {community}"
            )));
        }
        let body = if caller == target {
            "left the community"
        } else {
            "was removed from the community"
        };
        store::create_community_message(&db, &community, &target, body, &[], "ACTION")
    })
    .await
    .map_err(|e| ChatError::Persistence(format!("task join: {e}")))??;

    // Revoke the removed user's live subscriptions before fanning out the
    // notice, so they do not see it on the socket.
    let removed_conns = state.registry.connections_for(&user_id);
    if !removed_conns.is_empty() {
        state.rooms.revoke(&community_id, &removed_conns);
        let event = ServerEvent::RoomLeft {
            room_id: community_id.clone(),
        };
        if let Some(msg) = event.to_ws_message() {
            state.registry.send_to_connections(&removed_conns, msg);
        }
    }

    fan_out_action(&state, &community_id, &notice);

    Ok(StatusCode::NO_CONTENT)
}
