//! Health & readiness handlers.
//!
//! - GET /         -> greeting
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks scratch disk I/O and the object store

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /`
pub async fn root() -> Json<Value> {
    Json(json!({ "Hello": "World" }))
}

/// `GET /healthz`
///
/// Very small liveness probe; never performs I/O.
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
/// Readiness probe that:
/// 1. Performs a write/read/delete against the scratch directory.
/// 2. Lists the object store.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    // 1) Scratch directory check
    let tmp_path = state
        .sessions
        .scratch_dir()
        .join(format!(".readyz-{}", Uuid::new_v4()));
    let scratch_check = match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => match fs::read(&tmp_path).await {
            Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                Ok(_) => CheckStatus::ok(),
                Err(e) => CheckStatus {
                    ok: true,
                    error: Some(format!("could not remove tmp file: {}", e)),
                },
            },
            Ok(_) => {
                let _ = fs::remove_file(&tmp_path).await;
                CheckStatus::failed("file content mismatch")
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                CheckStatus::failed(format!("could not read tmp file: {}", e))
            }
        },
        Err(e) => CheckStatus::failed(format!("could not write tmp file: {}", e)),
    };

    // 2) Object store check
    let store_check = match state.store.list().await {
        Ok(_) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(format!("{} store: {}", state.store.backend_name(), e)),
    };

    let overall_ok = scratch_check.ok && store_check.ok;
    let mut checks = HashMap::new();
    checks.insert("scratch", scratch_check);
    checks.insert("store", store_check);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        sessions: state.sessions.session_count(),
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
    sessions: usize,
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

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
