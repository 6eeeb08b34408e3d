//! The display dispatch hot path.
//!
//! Every device poll runs the same cascade: low battery, then firmware
//! window, then sleep window, then playlist. The first three are cheap row
//! reads and pure window math; only the playlist branch can touch plugins
//! or the artifact cache, and it runs under the poll budget. Recoverable
//! trouble turns into a fallback image — devices must keep polling, so the
//! hot path never answers 5xx once authentication has resolved.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{self, LocalMoment};
use crate::config::{Config, FirmwareMode};
use crate::error::StoreError;
use crate::models::device::DeviceStatus;
use crate::models::{ArtifactKey, Device, PlaylistItem, Version};
use crate::plugins::{ImageSource, PluginContext, PluginRegistry, PluginResponse};
use crate::services::event_bus::{BusEvent, EventBus};
use crate::services::{resolver, RenderQueue};
use crate::store::Store;

/// Poll budget for the playlist branch.
const DISPATCH_BUDGET: Duration = Duration::from_secs(2);
/// Below this reported voltage the device gets the charge screen.
const LOW_BATTERY_VOLTS: f32 = 3.2;

/// Built-in screens served outside the plugin pipeline.
const IMG_LOW_BATTERY: (&str, &str) = ("low_battery", "/static/images/low_battery.png");
const IMG_SLEEP: (&str, &str) = ("sleep", "/static/images/sleep.png");
const IMG_EMPTY_STATE: (&str, &str) = ("empty_state", "/static/images/empty_state.png");
const IMG_LOADING: (&str, &str) = ("loading", "/static/images/loading.png");
const IMG_ERROR: (&str, &str) = ("error", "/static/images/error.png");
const IMG_TIMEOUT: (&str, &str) = ("timeout_error", "/static/images/timeout_error.png");

/// Request origin, honoring reverse-proxy headers, used to absolutize
/// artifact paths.
#[derive(Debug, Clone)]
pub struct BaseUrl {
    scheme: String,
    host: String,
}

impl BaseUrl {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
        }
    }

    pub fn absolute(&self, path: &str) -> String {
        format!("{}://{}{}", self.scheme, self.host, path)
    }

    /// Artifact rows hold either a static-relative path or a full URL.
    pub fn artifact_url(&self, artifact_path: &str) -> String {
        if artifact_path.starts_with("http://") || artifact_path.starts_with("https://") {
            artifact_path.to_string()
        } else {
            self.absolute(&format!("/static/{artifact_path}"))
        }
    }
}

/// What the device is told.
#[derive(Debug, Clone)]
pub struct DisplayDecision {
    /// 0 = ok, 202 = unclaimed.
    pub status: u16,
    pub filename: String,
    pub image_url: Option<String>,
    pub refresh_rate: u32,
    pub update_firmware: bool,
    pub firmware_url: Option<String>,
    pub reset_firmware: bool,
}

/// Writes that happen after the response: device status, rotation cursor,
/// SSE events. The handler spawns this; tests run it inline.
#[derive(Debug)]
pub struct DeferredWork {
    device_id: i64,
    mac: String,
    user_id: Option<i64>,
    status: DeviceStatus,
    seen_at: DateTime<Utc>,
    advance_cursor_to: Option<i64>,
}

impl DeferredWork {
    pub fn run(self, store: &Store, bus: &EventBus) {
        if let Err(e) = store.update_device_status(self.device_id, &self.status, self.seen_at) {
            tracing::error!(device_id = self.device_id, error = %e, "Deferred status write failed");
        }
        bus.emit(
            &self.mac,
            self.user_id,
            BusEvent::DeviceStatusUpdated {
                device_id: self.mac.clone(),
                battery_voltage: self.status.battery_voltage,
                rssi: self.status.rssi,
                firmware_version: self.status.firmware_version.clone(),
                last_seen: self.seen_at,
            },
        );
        if let Some(item_id) = self.advance_cursor_to {
            // Last writer wins under concurrent polls; acceptable per the
            // rotation contract.
            if let Err(e) = store.set_rotation_cursor(self.device_id, Some(item_id)) {
                tracing::error!(device_id = self.device_id, error = %e, "Cursor write failed");
            }
            bus.emit(
                &self.mac,
                self.user_id,
                BusEvent::PlaylistIndexChanged {
                    device_id: self.mac.clone(),
                    playlist_item_id: item_id,
                },
            );
        }
    }
}

pub struct DisplayOutcome {
    pub decision: DisplayDecision,
    pub deferred: DeferredWork,
}

/// What the playlist branch produced.
enum PlaylistOutcome {
    /// Nothing to show; claimed decides 0 vs 202.
    Empty { claimed: bool },
    Served {
        item_id: i64,
        filename: String,
        image_url: String,
        plugin_rate: u32,
        duration_override: Option<u32>,
    },
    /// Artifact missing; an immediate render is on the queue.
    Pending {
        duration_override: Option<u32>,
    },
    /// Plugin or store trouble; cursor must not advance.
    Errored {
        duration_override: Option<u32>,
    },
    TimedOut {
        duration_override: Option<u32>,
    },
}

pub struct Dispatcher {
    store: Arc<Store>,
    registry: Arc<PluginRegistry>,
    queue: Arc<RenderQueue>,
    config: Arc<Config>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<PluginRegistry>,
        queue: Arc<RenderQueue>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            registry,
            queue,
            config,
        }
    }

    /// Run the decision cascade for one authenticated poll.
    pub async fn dispatch(
        &self,
        device: &Device,
        status: DeviceStatus,
        base: &BaseUrl,
    ) -> DisplayOutcome {
        let now = Utc::now();
        let local = self.local_moment(device, now);

        let mut deferred = DeferredWork {
            device_id: device.id,
            mac: device.mac.to_string(),
            user_id: device.user_id,
            status,
            seen_at: now,
            advance_cursor_to: None,
        };

        // 1. Low battery: strictly below the threshold, zero means "not
        // reported". Everything else is skipped, firmware included.
        let voltage = deferred
            .status
            .battery_voltage
            .or(device.battery_voltage)
            .unwrap_or(0.0);
        if voltage > 0.0 && voltage < LOW_BATTERY_VOLTS {
            tracing::info!(device = %device.mac, voltage, "Serving low-battery screen");
            return DisplayOutcome {
                decision: builtin(IMG_LOW_BATTERY, base, device.refresh_rate, 0),
                deferred,
            };
        }

        // 2. Firmware: decorates the response, never replaces the image.
        let firmware_url = self.firmware_update_url(device, &local, base);

        // 3. Sleep: always a rate override, optionally also the screen.
        let sleep_active = device.sleep_enabled
            && clock::sleep_window_active(
                local.time,
                &device.sleep_window_start,
                &device.sleep_window_end,
            );
        let sleep_rate = clock::seconds_until_window_end_str(local.time, &device.sleep_window_end);

        if sleep_active && device.sleep_show_screen {
            let rate = sleep_rate.unwrap_or(device.refresh_rate);
            let mut decision = builtin(IMG_SLEEP, base, rate, 0);
            apply_firmware(&mut decision, firmware_url);
            return DisplayOutcome { decision, deferred };
        }

        // 4. Playlist, under the poll budget. Reported dimensions beat the
        // model row for the artifact lookup.
        let reported_dims = match (deferred.status.width, deferred.status.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        };
        let outcome = self.playlist_branch(device, &local, base, reported_dims).await;

        let mut decision = match outcome {
            PlaylistOutcome::Empty { claimed } => {
                let status = if claimed { 0 } else { 202 };
                builtin(IMG_EMPTY_STATE, base, device.refresh_rate, status)
            }
            PlaylistOutcome::Served {
                item_id,
                filename,
                image_url,
                plugin_rate,
                duration_override,
            } => {
                deferred.advance_cursor_to = Some(item_id);
                DisplayDecision {
                    status: 0,
                    filename,
                    image_url: Some(image_url),
                    refresh_rate: resolve_refresh(
                        duration_override,
                        plugin_rate,
                        device.refresh_rate,
                    ),
                    update_firmware: false,
                    firmware_url: None,
                    reset_firmware: false,
                }
            }
            PlaylistOutcome::Pending { duration_override } => builtin(
                IMG_LOADING,
                base,
                resolve_refresh(duration_override, 0, device.refresh_rate),
                0,
            ),
            PlaylistOutcome::Errored { duration_override } => builtin(
                IMG_ERROR,
                base,
                resolve_refresh(duration_override, 0, device.refresh_rate),
                0,
            ),
            PlaylistOutcome::TimedOut { duration_override } => builtin(
                IMG_TIMEOUT,
                base,
                resolve_refresh(duration_override, 0, device.refresh_rate),
                0,
            ),
        };

        // Sleep without the screen still owns the cadence.
        if sleep_active {
            if let Some(rate) = sleep_rate {
                decision.refresh_rate = rate;
            }
        }
        apply_firmware(&mut decision, firmware_url);
        decision.refresh_rate = decision.refresh_rate.clamp(1, clock::SECONDS_PER_DAY);

        DisplayOutcome { decision, deferred }
    }

    /// Serve the rotation's current item without advancing the cursor.
    pub fn current_screen(
        &self,
        device: &Device,
        base: &BaseUrl,
    ) -> (u16, String, Option<String>, Option<DateTime<Utc>>) {
        if !device.is_claimed() {
            return (202, IMG_EMPTY_STATE.0.to_string(), Some(base.absolute(IMG_EMPTY_STATE.1)), None);
        }
        let local = self.local_moment(device, Utc::now());
        let items = match device.playlist_id {
            Some(playlist_id) => self
                .store
                .items_for_playlist(playlist_id)
                .unwrap_or_default(),
            None => Vec::new(),
        };
        let active = resolver::active_items(&items, &local);
        let current = active
            .iter()
            .find(|item| Some(item.id) == device.last_playlist_item_id)
            .or_else(|| active.first());

        let current = match current {
            Some(item) => item,
            None => {
                return (
                    200,
                    IMG_EMPTY_STATE.0.to_string(),
                    Some(base.absolute(IMG_EMPTY_STATE.1)),
                    None,
                )
            }
        };

        match self.artifact_for_item(device, current, None) {
            Ok(Some(artifact)) => (
                200,
                format!("screen_{}", artifact.content_hash),
                Some(base.artifact_url(&artifact.path)),
                Some(artifact.rendered_at),
            ),
            _ => (
                200,
                IMG_LOADING.0.to_string(),
                Some(base.absolute(IMG_LOADING.1)),
                None,
            ),
        }
    }

    fn local_moment(&self, device: &Device, now: DateTime<Utc>) -> LocalMoment {
        let tz = device
            .user_id
            .and_then(|uid| self.store.user_timezone(uid).ok().flatten());
        clock::local_moment(now, tz.as_deref())
    }

    /// The firmware decoration, when every gate passes: updates allowed,
    /// window open, a newer latest release exists, and its payload is
    /// actually available in the current mode.
    fn firmware_update_url(
        &self,
        device: &Device,
        local: &LocalMoment,
        base: &BaseUrl,
    ) -> Option<String> {
        if !device.allow_firmware_updates {
            return None;
        }
        if !clock::firmware_window_open(
            local.time,
            &device.firmware_window_start,
            &device.firmware_window_end,
        ) {
            return None;
        }
        let latest = self.store.latest_firmware().ok().flatten()?;
        if Version::new(&device.firmware_version) >= latest.version {
            return None;
        }
        let available = match self.config.firmware_mode {
            FirmwareMode::Proxy => latest.download_url.is_some(),
            FirmwareMode::Download => latest
                .file_path
                .as_deref()
                .map(|p| Path::new(p).exists())
                .unwrap_or(false),
        };
        if !available {
            return None;
        }
        Some(base.absolute(&format!("/files/firmware/{}", latest.filename())))
    }

    async fn playlist_branch(
        &self,
        device: &Device,
        local: &LocalMoment,
        base: &BaseUrl,
        reported_dims: Option<(u32, u32)>,
    ) -> PlaylistOutcome {
        let playlist_id = match (device.is_claimed(), device.playlist_id) {
            (true, Some(id)) => id,
            _ => {
                return PlaylistOutcome::Empty {
                    claimed: device.is_claimed(),
                }
            }
        };

        let items = match self.store.items_for_playlist(playlist_id) {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(device = %device.mac, error = %e, "Playlist load failed");
                return PlaylistOutcome::Errored {
                    duration_override: None,
                };
            }
        };
        let active = resolver::active_items(&items, local);
        let chosen = match resolver::choose_next(&active, device.last_playlist_item_id) {
            Some(item) => item.clone(),
            None => return PlaylistOutcome::Empty { claimed: true },
        };
        let duration_override = chosen.duration_override;

        match tokio::time::timeout(
            DISPATCH_BUDGET,
            self.serve_item(device, &chosen, base, reported_dims),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    device = %device.mac,
                    item_id = chosen.id,
                    "Playlist dispatch exceeded budget"
                );
                PlaylistOutcome::TimedOut { duration_override }
            }
        }
    }

    async fn serve_item(
        &self,
        device: &Device,
        item: &PlaylistItem,
        base: &BaseUrl,
        reported_dims: Option<(u32, u32)>,
    ) -> PlaylistOutcome {
        let duration_override = item.duration_override;
        let errored = || PlaylistOutcome::Errored { duration_override };

        let instance = match self.store.get_plugin_instance(item.plugin_instance_id) {
            Ok(Some(instance)) => instance,
            Ok(None) => {
                tracing::warn!(item_id = item.id, "Playlist item references missing instance");
                return errored();
            }
            Err(e) => {
                tracing::error!(item_id = item.id, error = %e, "Instance load failed");
                return errored();
            }
        };
        let plugin = match self.registry.get(&instance.plugin_type) {
            Some(plugin) => plugin,
            None => {
                tracing::warn!(plugin_type = %instance.plugin_type, "Unknown plugin type");
                return errored();
            }
        };

        if plugin.definition().requires_processing {
            // Never execute processing plugins in the hot path; serve the
            // cache or queue a render.
            return match self.artifact_for_item(device, item, reported_dims) {
                Ok(Some(artifact)) => PlaylistOutcome::Served {
                    item_id: item.id,
                    filename: format!("screen_{}", artifact.content_hash),
                    image_url: base.artifact_url(&artifact.path),
                    plugin_rate: instance.refresh_interval,
                    duration_override,
                },
                Ok(None) => {
                    if let Err(e) = self.queue.schedule_immediate(instance.id) {
                        tracing::error!(instance_id = instance.id, error = %e, "Immediate schedule failed");
                        return errored();
                    }
                    PlaylistOutcome::Pending { duration_override }
                }
                Err(e) => {
                    tracing::error!(instance_id = instance.id, error = %e, "Artifact lookup failed");
                    errored()
                }
            };
        }

        // Hot-path plugin: run it now, bounded by its own fetch timeout and
        // the outer poll budget.
        let model = match self.store.model_for_device(device) {
            Ok(model) => model,
            Err(e) => {
                tracing::error!(device = %device.mac, error = %e, "Model load failed");
                return errored();
            }
        };
        let ctx = PluginContext {
            device: Some(device.clone()),
            settings: instance.settings.clone(),
            model,
            instance,
        };
        match plugin.process(&ctx).await {
            Ok(PluginResponse::Image {
                source: ImageSource::Url(url),
                filename,
                refresh_rate,
            }) => PlaylistOutcome::Served {
                item_id: item.id,
                filename,
                image_url: base.artifact_url(&url),
                plugin_rate: refresh_rate,
                duration_override,
            },
            Ok(PluginResponse::Image {
                source: ImageSource::Bytes(_),
                ..
            })
            | Ok(PluginResponse::Data { .. }) => {
                // A sync plugin has no business producing raw bytes or
                // template data; treat it as a contract violation.
                tracing::warn!(
                    plugin_type = %ctx.instance.plugin_type,
                    "Hot-path plugin returned a processed response"
                );
                errored()
            }
            Err(e) => {
                tracing::warn!(
                    plugin_type = %ctx.instance.plugin_type,
                    error = %e,
                    "Hot-path plugin failed"
                );
                errored()
            }
        }
    }

    fn artifact_for_item(
        &self,
        device: &Device,
        item: &PlaylistItem,
        reported_dims: Option<(u32, u32)>,
    ) -> Result<Option<crate::models::RenderedArtifact>, StoreError> {
        let model = self.store.model_for_device(device)?;
        let (width, height) = reported_dims.unwrap_or((model.width, model.height));
        self.store.get_artifact(&ArtifactKey {
            plugin_instance_id: item.plugin_instance_id,
            width,
            height,
            bit_depth: model.bit_depth,
        })
    }
}

fn builtin(screen: (&str, &str), base: &BaseUrl, refresh_rate: u32, status: u16) -> DisplayDecision {
    DisplayDecision {
        status,
        filename: screen.0.to_string(),
        image_url: Some(base.absolute(screen.1)),
        refresh_rate: refresh_rate.clamp(1, clock::SECONDS_PER_DAY),
        update_firmware: false,
        firmware_url: None,
        reset_firmware: false,
    }
}

fn apply_firmware(decision: &mut DisplayDecision, firmware_url: Option<String>) {
    if let Some(url) = firmware_url {
        decision.update_firmware = true;
        decision.firmware_url = Some(url);
    }
}

/// duration_override > plugin rate > device default, zeros meaning "no
/// opinion" at each level.
fn resolve_refresh(duration_override: Option<u32>, plugin_rate: u32, device_default: u32) -> u32 {
    let rate = match duration_override {
        Some(d) if d > 0 => d,
        _ if plugin_rate > 0 => plugin_rate,
        _ => device_default,
    };
    rate.clamp(1, clock::SECONDS_PER_DAY)
}
