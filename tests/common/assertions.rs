//! Assertion helpers.

use axum::http::StatusCode;
use pretty_assertions::assert_eq;

use super::app::TestResponse;

pub fn assert_status(response: &TestResponse, expected: StatusCode) {
    assert_eq!(
        response.status,
        expected,
        "Expected status {}, got {}. Body: {}",
        expected,
        response.status,
        response.text()
    );
}

pub fn assert_ok(response: &TestResponse) {
    assert_status(response, StatusCode::OK);
}

/// The device protocol carries its own status in the JSON body.
pub fn assert_json_status(response: &TestResponse, expected: u16) {
    let json = response.json();
    assert_eq!(
        json["status"].as_u64(),
        Some(expected as u64),
        "Expected body status {}, got {:?}. Full response: {}",
        expected,
        json["status"],
        serde_json::to_string_pretty(&json).unwrap()
    );
}

/// `refresh_rate` must be a string of seconds inside the protocol range.
pub fn assert_refresh_rate_in_range(response: &TestResponse) -> u32 {
    let json = response.json();
    let raw = json["refresh_rate"]
        .as_str()
        .unwrap_or_else(|| panic!("refresh_rate is not a string: {}", response.text()));
    let parsed: u32 = raw
        .parse()
        .unwrap_or_else(|_| panic!("refresh_rate does not parse: {raw}"));
    assert!(
        (1..=86_400).contains(&parsed),
        "refresh_rate {parsed} outside [1, 86400]"
    );
    parsed
}
