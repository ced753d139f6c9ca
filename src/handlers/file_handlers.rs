//! HTTP handlers for file operations.
//! Maps requests onto `FileService` calls and streams file bodies back out
//! without buffering them.

use crate::{
    errors::AppError,
    models::file_record::FileRecord,
    services::file_service::FileService,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::io::Cursor;
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

/// POST `/files` — multipart upload.
///
/// The `file` part carries the content; an optional `file_name` text part
/// overrides the filename declared on the `file` part.
pub async fn upload_file(
    State(service): State<FileService>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut content: Option<(Option<String>, Bytes)> = None;
    let mut name_override: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let part_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await?;
                content = Some((part_name, bytes));
            }
            Some("file_name") => {
                name_override = Some(field.text().await?);
            }
            other => debug!("ignoring multipart field {:?}", other),
        }
    }

    let (part_name, bytes) =
        content.ok_or_else(|| AppError::bad_request("missing `file` part"))?;
    let original_name = name_override
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or(part_name)
        .ok_or_else(|| AppError::bad_request("missing file name"))?;

    let record = service.upload(&original_name, Cursor::new(bytes)).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET `/files` — every record, soft-deleted ones included.
pub async fn list_files(
    State(service): State<FileService>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    Ok(Json(service.list().await?))
}

/// GET `/files/active` — records that are not soft-deleted.
pub async fn list_active_files(
    State(service): State<FileService>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    Ok(Json(service.list_active().await?))
}

/// GET `/files/{id}/meta`
pub async fn describe_file(
    State(service): State<FileService>,
    Path(id): Path<Uuid>,
) -> Result<Json<FileRecord>, AppError> {
    Ok(Json(service.describe(id).await?))
}

/// GET `/files/{id}` — download as a streaming response.
pub async fn download_file(
    State(service): State<FileService>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let (meta, file) = service.fetch(id).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// DELETE `/files/{id}` — soft delete.
pub async fn delete_file(
    State(service): State<FileService>,
    Path(id): Path<Uuid>,
) -> Result<Json<FileRecord>, AppError> {
    Ok(Json(service.soft_delete(id).await?))
}

fn set_file_headers(headers: &mut HeaderMap, meta: &FileRecord) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(meta.size_bytes.max(0) as u64),
    );

    let disposition = format!(
        "attachment; filename=\"{}\"",
        meta.original_name.replace('"', "")
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition).unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.checksum)) {
        headers.insert(header::ETAG, value);
    }
}
