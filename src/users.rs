//! User provisioning endpoint for the platform backend.
//!
//! User identity lives in the main Petzy backend; this service only mirrors
//! the id, display name, and account status it needs for the connect-time
//! status check and for display names on messages. The backend pushes each
//! record here with a service-role token whenever a user is created,
//! renamed, suspended, or reinstated.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::chat::store;
use crate::error::ChatError;
use crate::state::AppState;

/// Role the platform backend authenticates with. Regular user tokens carry
/// their platform role (owner, vendor, sitter, ...) and may not provision.
const SERVICE_ROLE: &str = "service";

#[derive(Debug, Deserialize)]
pub struct UpsertUserRequest {
    pub display_name: String,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "active".to_string()
}

/// PUT /api/users/{id} — Create or update a mirrored user record.
/// Idempotent; the latest write wins.
pub async fn upsert_user(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
    Json(body): Json<UpsertUserRequest>,
) -> Result<StatusCode, ChatError> {
    if claims.role != SERVICE_ROLE {
        return Err(ChatError::Authorization(
            "user provisioning requires a service token".to_string(),
        ));
    }

    let display_name = body.display_name.trim().to_string();
    if display_name.is_empty() || display_name.len() > 100 {
        return Err(ChatError::Malformed(
            "display name must be 1-100 characters".to_string(),
        ));
    }
    if body.status != "active" && body.status != "suspended" {
        return Err(ChatError::Malformed(format!(
            "unknown account status: {}",
            body.status
        )));
    }

    let db = state.db.clone();
    let status = body.status.clone();
    tokio::task::spawn_blocking(move || {
        store::upsert_user(&db, &user_id, &display_name, &status)
    })
    .await
    .map_err(|e| ChatError::Persistence(format!("task join: {e}")))??;

    Ok(StatusCode::NO_CONTENT)
}
