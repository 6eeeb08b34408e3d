//! Header parsing for the device protocol.

use axum::http::HeaderMap;

use crate::error::ApiError;
use crate::models::device::DeviceStatus;
use crate::services::BaseUrl;

/// Extension trait for convenient header parsing.
pub trait HeaderMapExt {
    /// Get a header value as a string, or return an error if missing.
    fn require_str(&self, name: &'static str) -> Result<&str, ApiError>;

    /// Get a header value as a string, returning None if missing.
    fn get_str(&self, name: &str) -> Option<&str>;

    /// Get a header value parsed as a type, returning None if missing or invalid.
    fn get_parsed<T: std::str::FromStr>(&self, name: &str) -> Option<T>;
}

impl HeaderMapExt for HeaderMap {
    fn require_str(&self, name: &'static str) -> Result<&str, ApiError> {
        self.get(name)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::MissingHeader(name))
    }

    fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }

    fn get_parsed<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.get_str(name).and_then(|v| v.parse().ok())
    }
}

/// Pull the optional device-status headers off a poll.
pub fn device_status(headers: &HeaderMap) -> DeviceStatus {
    DeviceStatus {
        firmware_version: headers.get_str("Fw-Version").map(str::to_string),
        battery_voltage: headers.get_parsed("Battery-Voltage"),
        rssi: headers.get_parsed("Rssi"),
        model: headers.get_str("Model").map(str::to_string),
        width: headers.get_parsed("Width"),
        height: headers.get_parsed("Height"),
        refresh_rate: headers.get_parsed("Refresh-Rate"),
    }
}

/// Request origin for URL rewriting, honoring reverse-proxy headers.
pub fn base_url(headers: &HeaderMap) -> BaseUrl {
    let scheme = headers
        .get_str("X-Forwarded-Proto")
        .unwrap_or("http")
        .to_string();
    let host = headers
        .get_str("X-Forwarded-Host")
        .or_else(|| headers.get_str("Host"))
        .unwrap_or("localhost:3000")
        .to_string();
    BaseUrl::new(scheme, host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    fn make_headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            let header_name = HeaderName::try_from(*name).unwrap();
            headers.insert(header_name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn require_str_reports_the_missing_header() {
        let headers = HeaderMap::new();
        let err = headers.require_str("ID").unwrap_err();
        assert!(matches!(err, ApiError::MissingHeader("ID")));
    }

    #[test]
    fn device_status_parses_reported_fields() {
        let headers = make_headers(&[
            ("fw-version", "1.7.1"),
            ("battery-voltage", "3.95"),
            ("rssi", "-67"),
            ("width", "800"),
            ("height", "480"),
        ]);
        let status = device_status(&headers);
        assert_eq!(status.firmware_version.as_deref(), Some("1.7.1"));
        assert_eq!(status.battery_voltage, Some(3.95));
        assert_eq!(status.rssi, Some(-67));
        assert_eq!((status.width, status.height), (Some(800), Some(480)));
        assert_eq!(status.model, None);
    }

    #[test]
    fn malformed_numeric_headers_become_none() {
        let headers = make_headers(&[("battery-voltage", "full"), ("rssi", "loud")]);
        let status = device_status(&headers);
        assert_eq!(status.battery_voltage, None);
        assert_eq!(status.rssi, None);
    }

    #[test]
    fn base_url_prefers_forwarded_headers() {
        let headers = make_headers(&[
            ("host", "internal:3000"),
            ("x-forwarded-proto", "https"),
            ("x-forwarded-host", "display.example.org"),
        ]);
        let base = base_url(&headers);
        assert_eq!(
            base.absolute("/static/images/sleep.png"),
            "https://display.example.org/static/images/sleep.png"
        );
    }

    #[test]
    fn base_url_falls_back_to_host_header() {
        let headers = make_headers(&[("host", "10.0.0.5:3000")]);
        let base = base_url(&headers);
        assert_eq!(base.absolute("/x"), "http://10.0.0.5:3000/x");
    }
}
