//! Attachment upload and retrieval.
//!
//! Files are stored on disk under `data_dir/attachments/<id>` with metadata
//! in the attachments table. Messages reference attachments by id; the
//! upload happens first, then the ids ride along on send_message.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::chat::store::{self, AttachmentMeta};
use crate::error::ChatError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub file_name: String,
}

/// POST /api/attachments?file_name=<name> — Upload a file as the raw request
/// body. The Content-Type header is recorded and echoed back on download.
/// Rate-limited at the router level.
pub async fn upload_attachment(
    State(state): State<AppState>,
    claims: Claims,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<AttachmentMeta>), ChatError> {
    let max_bytes = state.max_upload_size_mb * 1024 * 1024;
    if body.is_empty() {
        return Err(ChatError::Malformed("empty upload".to_string()));
    }
    if body.len() as u64 > max_bytes {
        return Err(ChatError::Malformed(format!(
            "attachment exceeds the {} MB limit",
            state.max_upload_size_mb
        )));
    }

    let file_name = params.file_name.trim();
    if file_name.is_empty() || file_name.contains('/') || file_name.contains("..") {
        return Err(ChatError::Malformed("invalid file name".to_string()));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let id = Uuid::now_v7().to_string();
    let dir = state.data_dir.join("attachments");
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ChatError::Persistence(format!("attachment dir: {e}")))?;
    tokio::fs::write(dir.join(&id), &body)
        .await
        .map_err(|e| ChatError::Persistence(format!("attachment write: {e}")))?;

    let db = state.db.clone();
    let owner_id = claims.sub.clone();
    let size = body.len() as u64;
    let meta_id = id.clone();
    let name = file_name.to_string();
    let ctype = content_type.clone();

    tokio::task::spawn_blocking(move || {
        store::record_attachment(&db, &meta_id, &owner_id, &name, &ctype, size)
    })
    .await
    .map_err(|e| ChatError::Persistence(format!("task join: {e}")))??;

    Ok((
        StatusCode::CREATED,
        Json(AttachmentMeta {
            id,
            owner_id: claims.sub,
            file_name: file_name.to_string(),
            content_type,
            size,
        }),
    ))
}

/// GET /api/attachments/{id} — Download an attachment. Any authenticated
/// user can fetch by id; ids are unguessable UUIDs handed out in messages.
pub async fn get_attachment(
    State(state): State<AppState>,
    _claims: Claims,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ChatError> {
    let db = state.db.clone();
    let meta_id = id.clone();
    let meta = tokio::task::spawn_blocking(move || store::attachment_meta(&db, &meta_id))
        .await
        .map_err(|e| ChatError::Persistence(format!("task join: {e}")))??
        .ok_or_else(|| ChatError::NotFound(format!("attachment {id}")))?;

    let path = state.data_dir.join("attachments").join(&meta.id);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ChatError::NotFound(format!("attachment {id}")))?;

    let headers = [
        (header::CONTENT_TYPE, meta.content_type.clone()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", meta.file_name),
        ),
    ];

    Ok((headers, bytes))
}
