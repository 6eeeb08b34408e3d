use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use utoipa::ToSchema;

use super::authenticate_by_token;
use crate::error::ApiError;
use crate::models::Version;
use crate::server::AppState;
use crate::services::firmware::FIRMWARE_TRANSFER_TIMEOUT;
use crate::services::FirmwareLocation;

/// Serve a firmware binary: `/files/firmware/firmware_<version>.bin`.
///
/// Public by design — the device fetches this before it has re-validated
/// its token. Proxy mode streams the upstream bytes through; download mode
/// serves the local file. An upstream failure mid-transfer simply closes
/// the connection, the bytes so far are already flushed.
pub async fn handle_firmware_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let version = parse_firmware_filename(&filename).ok_or(ApiError::NotFound)?;
    let location = state
        .firmware
        .payload_location(&version)?
        .ok_or(ApiError::NotFound)?;

    let body = match location {
        FirmwareLocation::Upstream(url) => {
            let response = state
                .http_client
                .get(&url)
                .timeout(FIRMWARE_TRANSFER_TIMEOUT)
                .send()
                .await
                .map_err(|e| {
                    tracing::warn!(version = %version, error = %e, "Firmware upstream unreachable");
                    ApiError::NotFound
                })?
                .error_for_status()
                .map_err(|_| ApiError::NotFound)?;
            Body::from_stream(response.bytes_stream())
        }
        FirmwareLocation::Local(path) => {
            let file = tokio::fs::File::open(&path).await.map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "Firmware file unreadable");
                ApiError::NotFound
            })?;
            Body::from_stream(ReaderStream::new(file))
        }
    };

    let disposition = format!("attachment; filename=\"{filename}\"");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CONTENT_DISPOSITION, disposition.as_str()),
        ],
        body,
    )
        .into_response())
}

fn parse_firmware_filename(filename: &str) -> Option<Version> {
    filename
        .strip_prefix("firmware_")
        .and_then(|rest| rest.strip_suffix(".bin"))
        .filter(|v| !v.is_empty())
        .map(Version::new)
}

/// Body of the update-complete report
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCompleteRequest {
    /// "success" or "failed"
    pub status: String,
    pub new_version: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpdateCompleteResponse {
    pub status: u16,
}

/// Device reports the outcome of a firmware update
#[utoipa::path(
    post,
    path = "/api/trmnl/firmware/update-complete",
    request_body = UpdateCompleteRequest,
    responses(
        (status = 200, description = "Report recorded", body = UpdateCompleteResponse),
        (status = 401, description = "Unknown token"),
    ),
    params(
        ("Access-Token" = String, Header, description = "API key from /api/setup"),
    ),
    tag = "Firmware"
)]
pub async fn handle_update_complete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(report): Json<UpdateCompleteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let device = authenticate_by_token(&state.store, &headers)?;

    match report.status.as_str() {
        "success" => {
            if let Some(version) = &report.new_version {
                state
                    .store
                    .set_device_firmware_version(device.id, version)?;
            }
            tracing::info!(
                device = %device.mac,
                version = ?report.new_version,
                "Firmware update succeeded"
            );
        }
        _ => {
            tracing::warn!(
                device = %device.mac,
                message = ?report.message,
                "Firmware update failed"
            );
        }
    }

    Ok(Json(UpdateCompleteResponse { status: 200 }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firmware_filename_parsing() {
        assert_eq!(
            parse_firmware_filename("firmware_1.7.1.bin").map(|v| v.as_str().to_string()),
            Some("1.7.1".to_string())
        );
        assert!(parse_firmware_filename("firmware_.bin").is_none());
        assert!(parse_firmware_filename("firmware_1.7.1.exe").is_none());
        assert!(parse_firmware_filename("update_1.7.1.bin").is_none());
    }
}
