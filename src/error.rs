use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Error taxonomy for the messaging core.
///
/// Authentication and authorization failures are terminal for the triggering
/// request only. Persistence failures are reported back to the originating
/// client so the UI can offer retry; they are never silently swallowed.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("malformed request: {0}")]
    Malformed(String),
}

impl ChatError {
    /// Numeric code carried on the `error` wire event.
    pub fn wire_code(&self) -> u16 {
        match self {
            ChatError::Malformed(_) => 400,
            ChatError::Authentication(_) => 401,
            ChatError::Authorization(_) => 403,
            ChatError::NotFound(_) => 404,
            ChatError::Persistence(_) => 500,
        }
    }

    /// HTTP status for the REST surface.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::Malformed(_) => StatusCode::BAD_REQUEST,
            ChatError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ChatError::Authorization(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "code": self.wire_code(),
            "message": self.to_string(),
        }));
        (self.status_code(), body).into_response()
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => {
                ChatError::NotFound("no such row".to_string())
            }
            other => ChatError::Persistence(other.to_string()),
        }
    }
}
