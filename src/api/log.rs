use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use super::authenticate;
use crate::error::ApiError;
use crate::server::AppState;

/// Response from log submission
#[derive(Debug, Serialize, ToSchema)]
pub struct LogResponse {
    pub status: u16,
    pub message: String,
}

/// Submit device logs
///
/// Devices post diagnostics when they hit trouble. The body is either a
/// single entry or `{"logs_array": [...]}`; every entry needs at least a
/// `level`.
#[utoipa::path(
    post,
    path = "/api/logs",
    request_body = Object,
    responses(
        (status = 200, description = "Logs persisted", body = LogResponse),
        (status = 400, description = "Entry without a level"),
        (status = 401, description = "Unknown token or MAC mismatch"),
    ),
    params(
        ("ID" = String, Header, description = "Device MAC address"),
        ("Access-Token" = String, Header, description = "API key from /api/setup"),
    ),
    tag = "Logging"
)]
pub async fn handle_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let device = authenticate(&state.store, &headers)?;

    let entries: Vec<&Value> = match body.get("logs_array").and_then(Value::as_array) {
        Some(array) => array.iter().collect(),
        None => vec![&body],
    };

    let now = Utc::now();
    let mut persisted = 0;
    for entry in entries {
        let level = entry
            .get("level")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Validation("log entry is missing level".into()))?;
        let message = entry
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        state
            .store
            .insert_device_log(device.id, level, message, entry, now)?;
        persisted += 1;
    }

    tracing::info!(device = %device.mac, count = persisted, "Device logs received");

    Ok(Json(LogResponse {
        status: 200,
        message: format!("{persisted} log entries persisted"),
    }))
}
