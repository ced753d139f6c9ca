//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata store and disk I/O

use crate::services::file_service::FileService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Always 200; performs no I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Pings the metadata store, bounded by the service deadline.
/// 2. Writes, reads back and removes a scratch file in the upload and trash
///    directories.
///
/// HTTP 200 when both checks pass, 503 otherwise.
pub async fn readyz(State(service): State<FileService>) -> impl IntoResponse {
    let metadata_check = match service.ping_metadata().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(e.to_string()),
    };
    let disk_check = match service.blobs().probe().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(e.to_string()),
    };

    let overall_ok = metadata_check.ok && disk_check.ok;

    let mut checks = HashMap::new();
    checks.insert("metadata", metadata_check);
    checks.insert("disk", disk_check);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
