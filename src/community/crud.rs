//! REST endpoints for creating and listing communities.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::chat::store::{self, Community};
use crate::error::ChatError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateCommunityRequest {
    pub name: String,
    pub description: Option<String>,
}

/// POST /api/communities — Create a community. The creator becomes owner
/// and first member.
pub async fn create_community(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateCommunityRequest>,
) -> Result<(StatusCode, Json<Community>), ChatError> {
    let name = body.name.trim().to_string();
    if name.is_empty() || name.len() > 100 {
        return Err(ChatError::Malformed(
            "community name must be 1-100 characters".to_string(),
        ));
    }

    let db = state.db.clone();
    let owner_id = claims.sub.clone();
    let description = body.description.clone();

    let community = tokio::task::spawn_blocking(move || {
        store::create_community(&db, &name, description.as_deref(), &owner_id)
    })
    .await
    .map_err(|e| ChatError::Persistence(format!("task join: {e}")))??;

    Ok((StatusCode::CREATED, Json(community)))
}

/// GET /api/communities — List communities the authenticated user belongs to.
pub async fn list_communities(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<Community>>, ChatError> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let communities = tokio::task::spawn_blocking(move || store::list_communities(&db, &user_id))
        .await
        .map_err(|e| ChatError::Persistence(format!("task join: {e}")))??;

    Ok(Json(communities))
}
