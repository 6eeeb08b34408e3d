//! Environment-driven server configuration.
//!
//! Every knob is read once at startup; the resulting [`Config`] is shared
//! behind an `Arc` and never mutated.

use std::path::PathBuf;
use std::time::Duration;

/// How firmware binaries reach devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareMode {
    /// Stream from the upstream URL on demand.
    Proxy,
    /// Download to `firmware_storage_dir` first, serve the local file.
    Download,
}

impl FirmwareMode {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "download" => FirmwareMode::Download,
            _ => FirmwareMode::Proxy,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Base directory for rendered artifacts and built-in images.
    pub static_dir: PathBuf,
    /// Local firmware directory (download mode).
    pub firmware_storage_dir: PathBuf,
    pub firmware_mode: FirmwareMode,
    /// Cadence of firmware discovery.
    pub firmware_poller_interval: Duration,
    /// Cadence of device-model sync.
    pub model_poller_interval: Duration,
    /// Upstream endpoint listing firmware releases.
    pub firmware_upstream_url: Option<String>,
    /// Upstream endpoint listing device models.
    pub model_upstream_url: Option<String>,
    /// Remote HTML-to-image service.
    pub rasterizer_url: Option<String>,
    /// Render worker count.
    pub render_workers: usize,
    /// Queue depth at which immediate schedules demote to normal priority.
    pub render_buffer: usize,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_duration_or(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_duration(&v))
        .unwrap_or(default)
}

/// Accepts plain seconds ("300") or a value with an h/m/s suffix ("6h").
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let (num, unit) = s.split_at(s.len().checked_sub(1)?);
    let n: u64 = num.parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(n)),
        "m" => Some(Duration::from_secs(n * 60)),
        "h" => Some(Duration::from_secs(n * 3600)),
        _ => None,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:3000"),
            database_path: PathBuf::from(env_or("DATABASE_PATH", "stationmaster.db")),
            static_dir: PathBuf::from(env_or("STATIC_DIR", "./static")),
            firmware_storage_dir: PathBuf::from(env_or("FIRMWARE_STORAGE_DIR", "./firmware")),
            firmware_mode: FirmwareMode::parse(&env_or("FIRMWARE_MODE", "proxy")),
            firmware_poller_interval: env_duration_or(
                "FIRMWARE_POLLER_INTERVAL",
                Duration::from_secs(6 * 3600),
            ),
            model_poller_interval: env_duration_or(
                "MODEL_POLLER_INTERVAL",
                Duration::from_secs(24 * 3600),
            ),
            firmware_upstream_url: std::env::var("FIRMWARE_UPSTREAM_URL").ok(),
            model_upstream_url: std::env::var("MODEL_UPSTREAM_URL").ok(),
            rasterizer_url: std::env::var("RASTERIZER_URL").ok(),
            render_workers: env_or("RENDER_WORKERS", "3").parse().unwrap_or(3),
            render_buffer: env_or("RENDER_BUFFER", "100").parse().unwrap_or(100),
        }
    }

    /// Directory rendered artifacts are written under.
    pub fn rendered_dir(&self) -> PathBuf {
        self.static_dir.join("rendered")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            database_path: PathBuf::from("stationmaster.db"),
            static_dir: PathBuf::from("./static"),
            firmware_storage_dir: PathBuf::from("./firmware"),
            firmware_mode: FirmwareMode::Proxy,
            firmware_poller_interval: Duration::from_secs(6 * 3600),
            model_poller_interval: Duration::from_secs(24 * 3600),
            firmware_upstream_url: None,
            model_upstream_url: None,
            rasterizer_url: None,
            render_workers: 3,
            render_buffer: 100,
        }
    }
}
