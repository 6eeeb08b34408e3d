use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use serde::Serialize;
use utoipa::ToSchema;

use super::headers::{base_url, HeaderMapExt};
use crate::error::ApiError;
use crate::models::DeviceId;
use crate::server::AppState;

/// Response from the /api/setup endpoint
#[derive(Debug, Serialize, ToSchema)]
pub struct SetupResponse {
    /// Status code (200 = success)
    pub status: u16,
    /// API key for authenticating future requests
    pub api_key: String,
    /// Human-readable device identifier
    pub friendly_id: String,
    /// Initial image to display until content is assigned
    pub image_url: String,
    pub filename: String,
}

/// Register a new device or retrieve an existing registration
///
/// The device sends its MAC address and receives an API key for future
/// requests. Unknown devices are auto-created unclaimed.
#[utoipa::path(
    get,
    path = "/api/setup",
    responses(
        (status = 200, description = "Device registered", body = SetupResponse),
        (status = 400, description = "Missing required header"),
    ),
    params(
        ("ID" = String, Header, description = "Device MAC address (e.g. 'AA:BB:CC:00:01:02')"),
        ("Model" = Option<String>, Header, description = "Device model name"),
        ("Fw-Version" = Option<String>, Header, description = "Firmware version"),
    ),
    tag = "Device"
)]
pub async fn handle_setup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let mac = DeviceId::new(headers.require_str("ID")?);
    let fw_version = headers.get_str("Fw-Version").unwrap_or("");
    let base = base_url(&headers);

    let device = match state.store.find_device_by_mac(&mac)? {
        Some(existing) => {
            tracing::info!(device = %mac, friendly_id = %existing.friendly_id, "Device already registered");
            existing
        }
        None => {
            let model_id = match headers.get_str("Model") {
                Some(name) => state.store.find_device_model(name)?.map(|m| m.id),
                None => None,
            };
            let created = state.store.create_device(&mac, model_id, fw_version)?;
            tracing::info!(
                device = %mac,
                friendly_id = %created.friendly_id,
                "New device registered"
            );
            created
        }
    };

    Ok(Json(SetupResponse {
        status: 200,
        api_key: device.api_key.as_str().to_string(),
        friendly_id: device.friendly_id,
        image_url: base.absolute("/static/images/setup.png"),
        filename: "setup".to_string(),
    }))
}
