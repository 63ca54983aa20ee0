//! HTTP handlers.
//!
//! Every response carries `success: bool` plus either a payload or a single
//! human-readable `error` string; internals never leak. Validation and
//! admission failures resolve synchronously; everything else about a
//! session's fate is observed by polling.

use super::AppState;
use crate::error::GatewayError;
use crate::session::{PairingOutcome, SessionSummary};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairRequest {
    #[serde(default)]
    pub phone_number: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": message.into() })),
    )
        .into_response()
}

/// `POST /api/pair` — validate, admission-check, start the session, then
/// wait for the pairing code or the timeout, whichever comes first.
pub async fn pair(State(state): State<AppState>, Json(req): Json<PairRequest>) -> Response {
    if req.phone_number.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Phone number is required");
    }

    let created = match state.manager.admit(&req.phone_number).await {
        Ok(created) => created,
        Err(GatewayError::InvalidPhoneNumber(_)) => {
            return error_response(StatusCode::BAD_REQUEST, "Invalid phone number format");
        }
        Err(GatewayError::AdmissionRejected { current, limit }) => {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "success": false,
                    "error": format!("Session limit reached. Maximum {limit} sessions allowed."),
                    "limit": limit,
                    "current": current,
                })),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!("pairing request failed before start: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to start session");
        }
    };

    // Install the waiter before the connect flow starts so the code can't
    // win a race against the registry.
    let receiver = state.waiters.register(&created.session_id).await;
    state.manager.clone().spawn_start(&created);

    match tokio::time::timeout(state.pairing_timeout, receiver).await {
        Ok(Ok(PairingOutcome::Code(code))) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "sessionId": created.session_id,
                "phoneNumber": created.phone_number,
                "code": code,
                "message": "Pairing code generated successfully",
            })),
        )
            .into_response(),
        Ok(Ok(PairingOutcome::Failed(reason))) => {
            tracing::error!(
                "[{}] pairing code generation failed: {reason}",
                created.session_id
            );
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate pairing code",
            )
        }
        Ok(Err(_closed)) => {
            // Sender dropped without resolving; treat like a failure.
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate pairing code",
            )
        }
        Err(_elapsed) => {
            // The background attempt keeps running; its terminal state is
            // observable via polling and the stale sweep reaps leftovers.
            state.waiters.forget(&created.session_id).await;
            tracing::warn!("[{}] pairing code generation timed out", created.session_id);
            error_response(
                StatusCode::REQUEST_TIMEOUT,
                "Pairing code generation timeout",
            )
        }
    }
}

/// `GET /api/session/:session_id` — current status record.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(record) = state.store.get(&session_id).await else {
        return error_response(StatusCode::NOT_FOUND, "Session not found");
    };
    let snapshot = record.snapshot();
    let mut body = json!({
        "success": true,
        "status": snapshot.status,
        "sessionId": snapshot.session_id,
        "phoneNumber": snapshot.phone_number,
        "createdAt": snapshot.created_at,
    });
    if let Some(code) = snapshot.code {
        body["code"] = json!(code);
    }
    if let Some(connected_at) = snapshot.connected_at {
        body["connectedAt"] = json!(connected_at);
    }
    if let Some(error) = snapshot.error {
        body["error"] = json!(error);
    }
    (StatusCode::OK, Json(body)).into_response()
}

/// `GET /api/sessions` — summary of every tracked session.
pub async fn list_sessions(State(state): State<AppState>) -> Response {
    let snapshots = state.store.list().await;
    let sessions: Vec<SessionSummary> = snapshots.iter().map(SessionSummary::from).collect();
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "count": sessions.len(),
            "limit": state.store.limit(),
            "sessions": sessions,
        })),
    )
        .into_response()
}

/// `DELETE /api/session/:session_id` — close the connection, delete the
/// credential directory, drop the store entry. Directory deletion happens
/// here so a partial failure can be reported to the caller.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.manager.close(&session_id).await {
        Ok(()) => {}
        Err(GatewayError::SessionNotFound) => {
            return error_response(StatusCode::NOT_FOUND, "Session not found");
        }
        Err(e) => {
            tracing::error!("[{session_id}] close failed: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to close session");
        }
    }

    if let Err(e) = state.dirs.delete(&session_id) {
        tracing::error!("[{session_id}] failed to remove credentials: {e}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Session closed but credentials could not be removed",
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Session deleted successfully",
        })),
    )
        .into_response()
}

/// `GET /api/health` — uptime, memory, and session counts.
pub async fn health(State(state): State<AppState>) -> Response {
    let counts = state.store.status_counts().await;
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "status": "online",
            "uptime": state.started_at.elapsed().as_secs_f64(),
            "activeSessions": counts.total,
            "pendingSessions": counts.pending,
            "connectedSessions": counts.connected,
            "memory": { "rss": rss_bytes() },
        })),
    )
        .into_response()
}

/// Resident set size in bytes. Linux-only; elsewhere reports null.
#[cfg(target_os = "linux")]
fn rss_bytes() -> Option<u64> {
    // Second field of /proc/self/statm is resident pages; 4 KiB pages on
    // every platform we deploy to.
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn rss_bytes() -> Option<u64> {
    None
}
