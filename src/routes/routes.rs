//! Defines routes for all file operations.
//!
//! ## Structure
//! - `POST   /files`            — upload (multipart)
//! - `GET    /files`            — list every record, deleted ones included
//! - `GET    /files/active`     — list records that are not soft-deleted
//! - `GET    /files/{id}`       — download file bytes
//! - `GET    /files/{id}/meta`  — metadata only
//! - `DELETE /files/{id}`       — soft-delete
//!
//! Plus `/healthz` and `/readyz` at the root.

use crate::{
    handlers::{
        file_handlers::{
            delete_file, describe_file, download_file, list_active_files, list_files, upload_file,
        },
        health_handlers::{healthz, readyz},
    },
    services::file_service::FileService,
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};

/// Build the router carrying `FileService` as shared state.
///
/// Request bodies larger than `max_upload_bytes` are rejected before they
/// reach the service.
pub fn routes(max_upload_bytes: usize) -> Router<FileService> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/files", get(list_files).post(upload_file))
        .route("/files/active", get(list_active_files))
        .route("/files/{id}", get(download_file).delete(delete_file))
        .route("/files/{id}/meta", get(describe_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
