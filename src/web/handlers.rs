//! HTTP request handlers.

use super::AppState;
use crate::audit::{AuditError, LogRecord};
use crate::db::{export_config, import_config, Channel, DbError, ImportError, Target, TargetRegistry};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

/// JSON error body: `{"error": <code>, "message": <text>}`.
pub fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    let body = json!({ "error": code, "message": message.into() });
    (status, Json(body)).into_response()
}

fn db_error(e: DbError) -> Response {
    match e {
        DbError::NotFound => error_response(StatusCode::NOT_FOUND, "not_found", "unknown target"),
        e => {
            tracing::error!("Registry error: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", e.to_string())
        }
    }
}

// ============================================================================
// API: Logs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub since: Option<String>,
}

pub async fn handle_get_logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Response {
    let audit = state.monitor.audit();

    let result = match query.since.as_deref() {
        Some(since) => match DateTime::parse_from_rfc3339(since) {
            Ok(ts) => audit.read_since(ts.with_timezone(&Utc)).await,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "invalid_since",
                    format!("since must be an RFC 3339 timestamp: {}", e),
                )
            }
        },
        None => audit.read_all().await,
    };

    match result {
        Ok(records) => Json(records).into_response(),
        Err(AuditError::NotFound) => error_response(StatusCode::NOT_FOUND, "no_logs_found", "No logs found."),
        Err(e) => {
            tracing::error!("Failed to read audit log: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "log_read_failed", e.to_string())
        }
    }
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> Response {
    match state.store.list_targets() {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    pub url: String,
    #[serde(default)]
    pub email: bool,
    #[serde(default)]
    pub pushover: bool,
}

/// Add a target. The URL is checked once first and only kept if it is up.
pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<CreateTargetRequest>,
) -> Response {
    let url = req.url.trim();
    if url.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "invalid_url", "url must not be empty");
    }

    let mut channels = Vec::new();
    if req.email {
        channels.push(Channel::Email);
    }
    if req.pushover {
        channels.push(Channel::Push);
    }
    let target = Target::new(url, channels);

    let outcome = state.checker.check(&target.id, &target.url).await;
    if !outcome.status.is_up() {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "url_not_up",
            format!("{} is not reachable: {}", target.url, outcome.describe()),
        );
    }

    if let Err(e) = state.store.upsert(&target) {
        return db_error(e);
    }

    tracing::info!(target_id = %target.id, url = %target.url, "Target added");
    state
        .monitor
        .audit()
        .append(LogRecord::info(
            "Target added.",
            json!({ "target_id": target.id, "url": target.url }),
        ))
        .await;

    (StatusCode::CREATED, Json(target)).into_response()
}

pub async fn handle_delete_target(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.remove(&id) {
        Ok(()) => {
            state
                .monitor
                .audit()
                .append(LogRecord::info("Target removed.", json!({ "target_id": id })))
                .await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

pub async fn handle_set_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ToggleRequest>,
) -> Response {
    match state.store.set_enabled(&id, req.enabled).and_then(|_| state.store.get(&id)) {
        Ok(target) => Json(target).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_set_channel(
    State(state): State<AppState>,
    Path((id, channel)): Path<(String, String)>,
    Json(req): Json<ToggleRequest>,
) -> Response {
    let channel: Channel = match channel.parse() {
        Ok(c) => c,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "invalid_channel", e),
    };

    match state
        .store
        .set_channel(&id, channel, req.enabled)
        .and_then(|_| state.store.get(&id))
    {
        Ok(target) => Json(target).into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// API: Configuration transfer
// ============================================================================

pub async fn handle_export_config(State(state): State<AppState>) -> Response {
    match export_config(&state.store) {
        Ok(doc) => Json(doc).into_response(),
        Err(e) => db_error(e),
    }
}

/// Replace the registry from a raw JSON document.
pub async fn handle_import_config(State(state): State<AppState>, body: String) -> Response {
    match import_config(&state.store, &body) {
        Ok(plan) => {
            let imported = plan.targets.as_ref().map(Vec::len);
            tracing::info!("Configuration imported ({:?} targets)", imported);
            state
                .monitor
                .audit()
                .append(LogRecord::info(
                    "Configuration imported.",
                    json!({ "targets": imported, "monitor_interval": plan.monitor_interval }),
                ))
                .await;
            Json(json!({ "imported_targets": imported, "monitor_interval": plan.monitor_interval }))
                .into_response()
        }
        Err(ImportError::Storage(e)) => db_error(e),
        Err(e) => {
            tracing::warn!("Rejected configuration import: {}", e);
            error_response(StatusCode::BAD_REQUEST, "invalid_import", e.to_string())
        }
    }
}

// ============================================================================
// API: Passes
// ============================================================================

pub async fn handle_trigger_pass(State(state): State<AppState>) -> Response {
    let already_running = state.monitor.is_running();
    if !already_running {
        state.monitor.trigger();
    }
    (StatusCode::ACCEPTED, Json(json!({ "already_running": already_running }))).into_response()
}
