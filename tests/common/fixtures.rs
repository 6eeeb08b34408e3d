//! Test fixtures and seeding helpers.

use serde_json::json;
use stationmaster::models::Device;
use stationmaster::models::DeviceId;

use super::TestApp;

/// Test MAC addresses for different scenarios
pub mod macs {
    pub const TEST_DEVICE: &str = "AA:BB:CC:00:01:02";
    pub const OTHER_DEVICE: &str = "AA:BB:CC:00:01:03";
}

/// Build headers for /api/display
pub fn display_headers<'a>(mac: &'a str, api_key: &'a str) -> Vec<(&'static str, String)> {
    vec![
        ("ID", mac.to_string()),
        ("Access-Token", api_key.to_string()),
        ("Fw-Version", "1.7.1".to_string()),
        ("Battery-Voltage", "4.12".to_string()),
        ("Rssi", "-67".to_string()),
        ("Width", "800".to_string()),
        ("Height", "480".to_string()),
    ]
}

pub fn as_str_pairs<'a>(headers: &'a [(&'static str, String)]) -> Vec<(&'static str, &'a str)> {
    headers.iter().map(|(k, v)| (*k, v.as_str())).collect()
}

/// An unclaimed device, straight from /api/setup semantics.
pub fn unclaimed_device(app: &TestApp, mac: &str) -> Device {
    app.store
        .create_device(&DeviceId::new(mac), None, "1.7.1")
        .unwrap()
}

/// A claimed device with a playlist of `redirect` items, one per URL.
/// Returns the device and the playlist item ids in position order.
pub fn claimed_device_with_redirects(
    app: &TestApp,
    mac: &str,
    urls: &[&str],
) -> (Device, Vec<i64>) {
    let user = app.store.create_user(Some("UTC")).unwrap();
    let playlist = app.store.create_playlist(user, "main").unwrap();

    let mut item_ids = Vec::new();
    for (position, url) in urls.iter().enumerate() {
        let instance = app
            .store
            .create_plugin_instance(
                user,
                "redirect",
                &format!("redirect-{position}"),
                &json!({"url": url}),
                900,
            )
            .unwrap();
        let item_id = app
            .store
            .add_playlist_item(playlist.id, instance.id, position as i64, None)
            .unwrap();
        item_ids.push(item_id);
    }

    let mut device = app
        .store
        .create_device(&DeviceId::new(mac), None, "1.7.1")
        .unwrap();
    app.store.claim_device(device.id, user).unwrap();
    app.store.assign_playlist(device.id, playlist.id).unwrap();
    device = app.store.get_device(device.id).unwrap().unwrap();
    (device, item_ids)
}

/// Format a chrono time offset from now (UTC) as "HH:MM" for window
/// fixtures that must bracket the current wall clock.
pub fn hhmm_from_now(offset_minutes: i64) -> String {
    let t = chrono::Utc::now() + chrono::Duration::minutes(offset_minutes);
    t.format("%H:%M").to_string()
}
