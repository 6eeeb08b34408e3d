use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use serde::Serialize;
use utoipa::ToSchema;

use super::headers::{base_url, device_status};
use super::{authenticate, authenticate_by_token};
use crate::error::ApiError;
use crate::server::AppState;
use crate::services::DisplayDecision;

/// Response from the /api/display endpoint
///
/// `status` rides in the body, not the HTTP status line: 0 = ok,
/// 202 = registered but unclaimed. `refresh_rate` is a string of seconds —
/// that is what the firmware parses.
#[derive(Debug, Serialize, ToSchema)]
pub struct DisplayJsonResponse {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub filename: String,
    pub refresh_rate: String,
    pub update_firmware: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_url: Option<String>,
    pub reset_firmware: bool,
}

impl From<DisplayDecision> for DisplayJsonResponse {
    fn from(decision: DisplayDecision) -> Self {
        Self {
            status: decision.status,
            image_url: decision.image_url,
            filename: decision.filename,
            refresh_rate: decision.refresh_rate.to_string(),
            update_firmware: decision.update_firmware,
            firmware_url: decision.firmware_url,
            reset_firmware: decision.reset_firmware,
        }
    }
}

/// Get the next screen for a device
///
/// The hot path: authenticates, runs the decision cascade (low battery,
/// firmware window, sleep window, playlist rotation) and answers within the
/// poll budget. Status and cursor writes happen after the response.
#[utoipa::path(
    get,
    path = "/api/display",
    responses(
        (status = 200, description = "Display decision", body = DisplayJsonResponse),
        (status = 400, description = "Missing required header"),
        (status = 401, description = "Unknown token or MAC mismatch"),
    ),
    params(
        ("ID" = String, Header, description = "Device MAC address"),
        ("Access-Token" = String, Header, description = "API key from /api/setup"),
        ("Fw-Version" = Option<String>, Header, description = "Firmware version"),
        ("Battery-Voltage" = Option<f32>, Header, description = "Battery voltage"),
        ("Rssi" = Option<i32>, Header, description = "WiFi signal strength"),
        ("Model" = Option<String>, Header, description = "Device model name"),
        ("Width" = Option<u32>, Header, description = "Display width in pixels"),
        ("Height" = Option<u32>, Header, description = "Display height in pixels"),
        ("Refresh-Rate" = Option<u32>, Header, description = "Current refresh rate in seconds"),
    ),
    tag = "Display"
)]
pub async fn handle_display(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let device = authenticate(&state.store, &headers)?;
    let status = device_status(&headers);
    let base = base_url(&headers);

    tracing::info!(
        device = %device.mac,
        battery = ?status.battery_voltage,
        rssi = ?status.rssi,
        "Display request received"
    );

    let outcome = state.dispatcher.dispatch(&device, status, &base).await;

    // Status write, cursor advance and SSE fan-out happen off the response
    // path.
    let store = state.store.clone();
    let bus = state.bus.clone();
    let deferred = outcome.deferred;
    tokio::spawn(async move {
        deferred.run(&store, &bus);
    });

    Ok(Json(DisplayJsonResponse::from(outcome.decision)))
}

/// Response from /api/current_screen
#[derive(Debug, Serialize, ToSchema)]
pub struct CurrentScreenResponse {
    /// 200 = ok, 202 = unclaimed
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub filename: String,
    pub refresh_rate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Peek at the current screen without advancing rotation
#[utoipa::path(
    get,
    path = "/api/current_screen",
    responses(
        (status = 200, description = "Current screen", body = CurrentScreenResponse),
        (status = 401, description = "Unknown token"),
    ),
    params(
        ("Access-Token" = String, Header, description = "API key from /api/setup"),
    ),
    tag = "Display"
)]
pub async fn handle_current_screen(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let device = authenticate_by_token(&state.store, &headers)?;
    let base = base_url(&headers);

    let (status, filename, image_url, rendered_at) =
        state.dispatcher.current_screen(&device, &base);

    Ok(Json(CurrentScreenResponse {
        status,
        image_url,
        filename,
        refresh_rate: device.refresh_rate.clamp(1, 86_400).to_string(),
        rendered_at,
    }))
}
