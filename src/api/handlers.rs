//! HTTP handlers for history, attachments and identity.

use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::chat::{ChatMessage, HISTORY_PAGE_SIZE};
use crate::identity::Identity;
use crate::storage::StorageError;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Multipart field carrying the uploaded file.
const UPLOAD_FIELD: &str = "file";

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Query parameters for history pagination.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Only messages with an id strictly below this cursor.
    pub last_id: Option<i64>,
}

/// GET /api/messages?last_id=N
pub async fn list_messages(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let messages = state.repo.history(query.last_id, HISTORY_PAGE_SIZE).await?;
    Ok(Json(messages))
}

/// POST /api/upload
///
/// Stores the blob first, then appends the attachment and its file message
/// in one transaction. A failed append removes the blob again.
pub async fn upload(
    State(state): State<AppState>,
    identity: Identity,
    mut multipart: Multipart,
) -> ApiResult<StatusCode> {
    let (original_name, data) = loop {
        let field = multipart
            .next_field()
            .await
            .map_err(multipart_error)?
            .ok_or_else(|| ApiError::bad_request("missing multipart field 'file'"))?;

        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let original_name = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "upload".to_string());
        let data = field.bytes().await.map_err(multipart_error)?;
        break (original_name, data);
    };

    let stored_name = state.storage.generate_name(&original_name);
    let size = data.len();
    state
        .storage
        .write(&stored_name, data)
        .await
        .map_err(|e| ApiError::internal(format!("failed to store upload: {e}")))?;

    if let Err(e) = state
        .pipeline
        .submit_file(&identity.nickname, &original_name, &stored_name)
        .await
    {
        if let Err(cleanup) = state.storage.delete(&stored_name).await {
            warn!("Failed to remove orphaned blob {}: {}", stored_name, cleanup);
        }
        return Err(e.into());
    }

    info!(
        "{} uploaded {} ({} bytes) as {}",
        identity.nickname, original_name, size, stored_name
    );
    Ok(StatusCode::CREATED)
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large(err.body_text())
    } else {
        ApiError::bad_request(err.body_text())
    }
}

/// GET /api/files/{file_id}
pub async fn download_file(
    State(state): State<AppState>,
    file_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Response> {
    // An id that does not parse cannot name an attachment.
    let Path(file_id) = file_id.map_err(|e| ApiError::not_found(e.body_text()))?;

    let attachment = state
        .repo
        .attachment(file_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("file {file_id}")))?;

    let blob = state
        .storage
        .open(&attachment.stored_name)
        .await
        .map_err(|e| match e {
            StorageError::NotFound(_) => ApiError::not_found(format!("file {file_id}")),
            other => other.into(),
        })?;

    let mime = mime_guess::from_path(&attachment.original_name).first_or_octet_stream();
    let body = Body::from_stream(ReaderStream::new(blob.reader));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(header::CONTENT_LENGTH, blob.size)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&attachment.original_name),
        )
        .body(body)
        .map_err(|e| ApiError::internal(format!("failed to build response: {e}")))
}

/// `attachment; filename="<name>"` with quotes and control characters removed.
fn content_disposition(original_name: &str) -> HeaderValue {
    let cleaned: String = original_name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c == '"' { '\'' } else { c })
        .collect();
    HeaderValue::from_bytes(format!("attachment; filename=\"{cleaned}\"").as_bytes())
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// GET /api/myname
pub async fn my_name(identity: Identity) -> Json<Identity> {
    Json(identity)
}

/// Fallback when no web client directory is configured.
pub async fn not_found() -> impl IntoResponse {
    ApiError::not_found("no such route")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_plain() {
        let value = content_disposition("report.pdf");
        assert_eq!(value.to_str().unwrap(), "attachment; filename=\"report.pdf\"");
    }

    #[test]
    fn test_content_disposition_replaces_quotes() {
        let value = content_disposition("my \"best\".txt");
        assert_eq!(
            value.to_str().unwrap(),
            "attachment; filename=\"my 'best'.txt\""
        );
    }

    #[test]
    fn test_content_disposition_strips_control_chars() {
        let value = content_disposition("a\r\nb.txt");
        assert_eq!(value.to_str().unwrap(), "attachment; filename=\"ab.txt\"");
    }
}
