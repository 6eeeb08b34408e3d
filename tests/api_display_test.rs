//! Tests for /api/display: authentication, the decision cascade, rotation,
//! and refresh-rate priority.

mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use common::fixtures::{
    as_str_pairs, claimed_device_with_redirects, display_headers, hhmm_from_now, macs,
    unclaimed_device,
};
use common::{assert_json_status, assert_ok, assert_refresh_rate_in_range, assert_status, TestApp};
use serde_json::json;
use stationmaster::error::PluginError;
use stationmaster::models::{PluginDefinition, PluginKind, Version};
use stationmaster::plugins::{ImageSource, Plugin, PluginContext, PluginResponse};

#[tokio::test]
async fn unclaimed_device_gets_empty_state_202() {
    let app = TestApp::new();
    let device = unclaimed_device(&app, macs::TEST_DEVICE);

    let headers = display_headers(macs::TEST_DEVICE, device.api_key.as_str());
    let response = app
        .get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;

    assert_ok(&response);
    assert_json_status(&response, 202);
    let json = response.json();
    assert_eq!(json["filename"], "empty_state");
    assert_eq!(json["update_firmware"], false);
    assert_eq!(json["refresh_rate"], device.refresh_rate.to_string());
}

#[tokio::test]
async fn wrong_token_is_401() {
    let app = TestApp::new();
    unclaimed_device(&app, macs::TEST_DEVICE);

    let headers = display_headers(macs::TEST_DEVICE, "00000000000000000000000000000000");
    let response = app
        .get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_of_another_device_is_401() {
    let app = TestApp::new();
    unclaimed_device(&app, macs::TEST_DEVICE);
    let other = unclaimed_device(&app, macs::OTHER_DEVICE);

    // Valid token, but presented with the wrong MAC.
    let headers = display_headers(macs::TEST_DEVICE, other.api_key.as_str());
    let response = app
        .get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
    // The error body must not say which check failed.
    assert_eq!(response.json()["error"], "Unauthorized");
}

#[tokio::test]
async fn low_battery_beats_sleep_and_firmware() {
    let app = TestApp::new();
    let (mut device, _) =
        claimed_device_with_redirects(&app, macs::TEST_DEVICE, &["https://img.example/a.png"]);

    // Sleep window active and a firmware update pending...
    device.sleep_enabled = true;
    device.sleep_show_screen = true;
    device.sleep_window_start = hhmm_from_now(-60);
    device.sleep_window_end = hhmm_from_now(120);
    device.allow_firmware_updates = true;
    app.store.update_device(&device).unwrap();
    app.store
        .upsert_firmware(&Version::new("9.9.9"), Some("https://fw/9.9.9.bin"))
        .unwrap();
    app.store
        .set_latest_firmware(&Version::new("9.9.9"))
        .unwrap();

    // ...but the reported battery is below threshold.
    let mut headers = display_headers(macs::TEST_DEVICE, device.api_key.as_str());
    headers.retain(|(name, _)| *name != "Battery-Voltage");
    headers.push(("Battery-Voltage", "3.1".to_string()));

    let response = app
        .get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;
    assert_ok(&response);
    assert_json_status(&response, 0);
    let json = response.json();
    assert_eq!(json["filename"], "low_battery");
    assert_eq!(json["update_firmware"], false);
    assert!(json.get("firmware_url").is_none());
}

#[tokio::test]
async fn battery_exactly_at_threshold_is_not_low() {
    let app = TestApp::new();
    let (device, _) =
        claimed_device_with_redirects(&app, macs::TEST_DEVICE, &["https://img.example/a.png"]);

    let mut headers = display_headers(macs::TEST_DEVICE, device.api_key.as_str());
    headers.retain(|(name, _)| *name != "Battery-Voltage");
    headers.push(("Battery-Voltage", "3.2".to_string()));

    let response = app
        .get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;
    assert_ok(&response);
    assert_ne!(response.json()["filename"], "low_battery");
}

#[tokio::test]
async fn sleep_overrides_screen_and_refresh() {
    let app = TestApp::new();
    let (mut device, _) =
        claimed_device_with_redirects(&app, macs::TEST_DEVICE, &["https://img.example/a.png"]);
    device.sleep_enabled = true;
    device.sleep_show_screen = true;
    device.sleep_window_start = hhmm_from_now(-60);
    device.sleep_window_end = hhmm_from_now(120);
    app.store.update_device(&device).unwrap();

    let headers = display_headers(macs::TEST_DEVICE, device.api_key.as_str());
    let response = app
        .get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;

    assert_ok(&response);
    let json = response.json();
    assert_eq!(json["filename"], "sleep");
    let rate = assert_refresh_rate_in_range(&response);
    // Window ends ~120 minutes out; HH:MM truncation costs up to a minute.
    assert!(
        (115 * 60..=121 * 60).contains(&rate),
        "sleep refresh {rate} not near window end"
    );
}

#[tokio::test]
async fn sleep_without_screen_still_owns_the_cadence() {
    let app = TestApp::new();
    let (mut device, _) =
        claimed_device_with_redirects(&app, macs::TEST_DEVICE, &["https://img.example/a.png"]);
    device.sleep_enabled = true;
    device.sleep_show_screen = false;
    device.sleep_window_start = hhmm_from_now(-60);
    device.sleep_window_end = hhmm_from_now(120);
    app.store.update_device(&device).unwrap();

    let headers = display_headers(macs::TEST_DEVICE, device.api_key.as_str());
    let response = app
        .get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;

    assert_ok(&response);
    let json = response.json();
    // The playlist image is still served...
    assert!(json["filename"].as_str().unwrap().starts_with("redirect_"));
    // ...but the cadence is the sleep remainder, not the device default.
    let rate = assert_refresh_rate_in_range(&response);
    assert!(rate > 900, "sleep must override the 900s default, got {rate}");
}

#[tokio::test]
async fn rotation_advances_in_order_and_wraps() {
    let app = TestApp::new();
    let urls = [
        "https://img.example/a.png",
        "https://img.example/b.png",
        "https://img.example/c.png",
    ];
    let (device, item_ids) = claimed_device_with_redirects(&app, macs::TEST_DEVICE, &urls);
    let headers = display_headers(macs::TEST_DEVICE, device.api_key.as_str());

    let mut served = Vec::new();
    for expected_cursor in [item_ids[0], item_ids[1], item_ids[2], item_ids[0]] {
        let response = app
            .get_with_headers("/api/display", &as_str_pairs(&headers))
            .await;
        assert_ok(&response);
        assert_json_status(&response, 0);
        served.push(response.json()["image_url"].as_str().unwrap().to_string());

        // Cursor writes are deferred past the response.
        app.wait_for(|| {
            app.store
                .get_device(device.id)
                .unwrap()
                .unwrap()
                .last_playlist_item_id
                == Some(expected_cursor)
        })
        .await;
    }

    assert_eq!(served, vec![urls[0], urls[1], urls[2], urls[0]]);
}

#[tokio::test]
async fn failed_item_does_not_advance_the_cursor() {
    let app = TestApp::new();
    let (device, item_ids) = claimed_device_with_redirects(
        &app,
        macs::TEST_DEVICE,
        &["https://img.example/a.png", "https://img.example/b.png"],
    );
    // Break item B: wipe the url its plugin needs.
    let item_b = app.store.get_playlist_item(item_ids[1]).unwrap().unwrap();
    app.store
        .update_instance_settings(item_b.plugin_instance_id, &json!({}))
        .unwrap();

    let headers = display_headers(macs::TEST_DEVICE, device.api_key.as_str());

    // Poll 1 serves A and moves the cursor.
    let first = app
        .get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;
    assert_eq!(first.json()["image_url"], "https://img.example/a.png");
    app.wait_for(|| {
        app.store
            .get_device(device.id)
            .unwrap()
            .unwrap()
            .last_playlist_item_id
            == Some(item_ids[0])
    })
    .await;

    // Poll 2 hits broken B: fallback image, cursor stays on A.
    let second = app
        .get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;
    assert_eq!(second.json()["filename"], "error");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(
        app.store
            .get_device(device.id)
            .unwrap()
            .unwrap()
            .last_playlist_item_id,
        Some(item_ids[0])
    );

    // Poll 3 retries B rather than skipping to A's successor.
    let third = app
        .get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;
    assert_eq!(third.json()["filename"], "error");
}

#[tokio::test]
async fn firmware_update_decorates_normal_response() {
    let app = TestApp::new();
    let (mut device, _) =
        claimed_device_with_redirects(&app, macs::TEST_DEVICE, &["https://img.example/a.png"]);
    device.allow_firmware_updates = true;
    app.store.update_device(&device).unwrap();
    app.store
        .upsert_firmware(&Version::new("1.10.0"), Some("https://fw/1.10.0.bin"))
        .unwrap();
    app.store
        .set_latest_firmware(&Version::new("1.10.0"))
        .unwrap();

    // Device reports 1.7.1 < 1.10.0 (numeric, not lexicographic).
    let headers = display_headers(macs::TEST_DEVICE, device.api_key.as_str());
    let response = app
        .get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;

    assert_ok(&response);
    let json = response.json();
    assert_eq!(json["update_firmware"], true);
    assert!(json["firmware_url"]
        .as_str()
        .unwrap()
        .ends_with("/files/firmware/firmware_1.10.0.bin"));
    // The image is still the playlist content.
    assert_eq!(json["image_url"], "https://img.example/a.png");
}

#[tokio::test]
async fn firmware_update_requires_opt_in_and_newer_version() {
    let app = TestApp::new();
    let (device, _) =
        claimed_device_with_redirects(&app, macs::TEST_DEVICE, &["https://img.example/a.png"]);
    app.store
        .upsert_firmware(&Version::new("1.7.1"), Some("https://fw/1.7.1.bin"))
        .unwrap();
    app.store
        .set_latest_firmware(&Version::new("1.7.1"))
        .unwrap();

    // allow_firmware_updates defaults to false, and the version is equal
    // anyway; both gates keep update_firmware off.
    let headers = display_headers(macs::TEST_DEVICE, device.api_key.as_str());
    let response = app
        .get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;
    assert_eq!(response.json()["update_firmware"], false);
}

#[tokio::test]
async fn processing_plugin_cache_miss_queues_and_serves_fallback() {
    let app = TestApp::new();
    let user = app.store.create_user(Some("UTC")).unwrap();
    let playlist = app.store.create_playlist(user, "main").unwrap();
    let instance = app
        .store
        .create_plugin_instance(
            user,
            "webhook",
            "stats",
            &json!({"url": "https://data.example/d.json"}),
            600,
        )
        .unwrap();
    app.store
        .add_playlist_item(playlist.id, instance.id, 0, None)
        .unwrap();
    let device = unclaimed_device(&app, macs::TEST_DEVICE);
    app.store.claim_device(device.id, user).unwrap();
    app.store.assign_playlist(device.id, playlist.id).unwrap();

    let headers = display_headers(macs::TEST_DEVICE, device.api_key.as_str());
    let response = app
        .get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;

    assert_ok(&response);
    assert_eq!(response.json()["filename"], "loading");

    // Exactly one immediate job was queued, and repeats coalesce.
    let job = app
        .store
        .pending_job_for_instance(instance.id)
        .unwrap()
        .unwrap();
    assert_eq!(job.priority, 100);
    app.get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;
    assert_eq!(
        app.store.job_counts().unwrap().get("pending"),
        Some(&1),
        "cache-miss polls must coalesce onto one pending job"
    );
}

/// Hot-path plugin that blows the poll budget.
struct SlowPlugin {
    definition: PluginDefinition,
}

impl SlowPlugin {
    fn new() -> Self {
        Self {
            definition: PluginDefinition {
                type_id: "slowpoke",
                kind: PluginKind::System,
                requires_processing: false,
                config_schema: json!({}),
                template: None,
                layout: None,
            },
        }
    }
}

#[async_trait]
impl Plugin for SlowPlugin {
    fn definition(&self) -> &PluginDefinition {
        &self.definition
    }

    async fn process(&self, _ctx: &PluginContext) -> Result<PluginResponse, PluginError> {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        Ok(PluginResponse::Image {
            source: ImageSource::Url("https://img.example/late.png".into()),
            filename: "late".into(),
            refresh_rate: 0,
        })
    }
}

#[tokio::test]
async fn slow_plugin_times_out_with_duration_override_rate() {
    let app = TestApp::with_config_and_registry(
        |_| {},
        |registry| registry.register(std::sync::Arc::new(SlowPlugin::new())),
    );

    let user = app.store.create_user(Some("UTC")).unwrap();
    let playlist = app.store.create_playlist(user, "main").unwrap();
    let instance = app
        .store
        .create_plugin_instance(user, "slowpoke", "slow", &json!({}), 900)
        .unwrap();
    app.store
        .add_playlist_item(playlist.id, instance.id, 0, Some(45))
        .unwrap();
    let device = unclaimed_device(&app, macs::TEST_DEVICE);
    app.store.claim_device(device.id, user).unwrap();
    app.store.assign_playlist(device.id, playlist.id).unwrap();

    let headers = display_headers(macs::TEST_DEVICE, device.api_key.as_str());
    let response = app
        .get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;

    assert_ok(&response);
    let json = response.json();
    assert_eq!(json["filename"], "timeout_error");
    assert_eq!(json["refresh_rate"], "45");

    // The cursor did not move: the item gets retried next poll.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(
        app.store
            .get_device(device.id)
            .unwrap()
            .unwrap()
            .last_playlist_item_id,
        None
    );
}

#[tokio::test]
async fn claimed_device_with_empty_playlist_is_status_0() {
    let app = TestApp::new();
    let user = app.store.create_user(Some("UTC")).unwrap();
    let playlist = app.store.create_playlist(user, "empty").unwrap();
    let device = unclaimed_device(&app, macs::TEST_DEVICE);
    app.store.claim_device(device.id, user).unwrap();
    app.store.assign_playlist(device.id, playlist.id).unwrap();

    let headers = display_headers(macs::TEST_DEVICE, device.api_key.as_str());
    let response = app
        .get_with_headers("/api/display", &as_str_pairs(&headers))
        .await;

    assert_json_status(&response, 0);
    assert_eq!(response.json()["filename"], "empty_state");
    assert_refresh_rate_in_range(&response);
}
