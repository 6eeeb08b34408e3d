//! Device-facing HTTP handlers.

pub mod display;
pub mod events;
pub mod firmware;
pub mod headers;
pub mod log;
pub mod setup;

pub use display::{
    handle_current_screen, handle_display, CurrentScreenResponse, DisplayJsonResponse,
    __path_handle_current_screen, __path_handle_display,
};
pub use events::handle_events;
pub use firmware::{
    handle_firmware_file, handle_update_complete, UpdateCompleteRequest, UpdateCompleteResponse,
    __path_handle_update_complete,
};
pub use headers::HeaderMapExt;
pub use log::{handle_logs, LogResponse, __path_handle_logs};
pub use setup::{handle_setup, SetupResponse, __path_handle_setup};

use axum::http::HeaderMap;
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::Device;
use crate::store::Store;

/// Resolve the Access-Token to a device and check the claimed MAC matches.
/// Either failure is the same 401 — the response must not reveal which
/// check tripped.
pub fn authenticate(store: &Arc<Store>, headers: &HeaderMap) -> Result<Device, ApiError> {
    let token = headers.require_str("Access-Token")?;
    let mac = headers.require_str("ID")?;

    let device = store
        .find_device_by_api_key(token)?
        .ok_or(ApiError::Unauthorized)?;
    if device.mac.as_str() != mac {
        return Err(ApiError::Unauthorized);
    }
    Ok(device)
}

/// Token-only authentication for endpoints without the ID header.
pub fn authenticate_by_token(store: &Arc<Store>, headers: &HeaderMap) -> Result<Device, ApiError> {
    let token = headers.require_str("Access-Token")?;
    store
        .find_device_by_api_key(token)?
        .ok_or(ApiError::Unauthorized)
}
