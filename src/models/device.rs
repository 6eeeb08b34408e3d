use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Device identifier (MAC address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(mac: impl Into<String>) -> Self {
        Self(mac.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Characters used for friendly ids (excludes ambiguous I, L, O, 0, 1).
const FRIENDLY_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// API authentication token.
///
/// A 32-character hex string (~128 bits of entropy). The friendly id shown
/// on device screens is derived deterministically from the key by hashing,
/// so the same key always maps to the same short id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey(String);

impl ApiKey {
    /// Generate a new random API key.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let bytes: [u8; 16] = rng.gen();
        Self(hex::encode(bytes))
    }

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a 6-character friendly id from the key.
    pub fn friendly_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let hash = hasher.finalize();
        hash.iter()
            .take(6)
            .map(|b| FRIENDLY_CHARS[(*b as usize) % FRIENDLY_CHARS.len()] as char)
            .collect()
    }
}

/// A screen geometry row. Immutable per version; superseded versions stay
/// in the table so old artifacts remain interpretable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModel {
    pub id: i64,
    pub name: String,
    pub version: i64,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u32,
    pub color_depth: u32,
}

impl DeviceModel {
    /// Fallback geometry when a device has no model row.
    pub fn fallback() -> Self {
        Self {
            id: 0,
            name: "og".into(),
            version: 1,
            width: 800,
            height: 480,
            bit_depth: 1,
            color_depth: 2,
        }
    }
}

/// A registered display device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub mac: DeviceId,
    pub api_key: ApiKey,
    pub friendly_id: String,
    /// Owning user; `None` until claimed.
    pub user_id: Option<i64>,
    pub playlist_id: Option<i64>,
    pub model_id: Option<i64>,
    pub firmware_version: String,
    pub battery_voltage: Option<f32>,
    pub rssi: Option<i32>,
    pub last_seen: Option<chrono::DateTime<chrono::Utc>>,
    /// Default polling cadence in seconds.
    pub refresh_rate: u32,
    pub allow_firmware_updates: bool,
    /// "HH:MM" bounds; empty string means no bound.
    pub firmware_window_start: String,
    pub firmware_window_end: String,
    pub sleep_window_start: String,
    pub sleep_window_end: String,
    pub sleep_enabled: bool,
    pub sleep_show_screen: bool,
    /// Rotation cursor: the last-served playlist item.
    pub last_playlist_item_id: Option<i64>,
}

impl Device {
    pub fn is_claimed(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Device-reported status headers on a poll.
#[derive(Debug, Clone, Default)]
pub struct DeviceStatus {
    pub firmware_version: Option<String>,
    pub battery_voltage: Option<f32>,
    pub rssi: Option<i32>,
    pub model: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub refresh_rate: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_is_32_hex_chars() {
        let key = ApiKey::generate();
        assert_eq!(key.as_str().len(), 32);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn friendly_id_is_deterministic() {
        let key = ApiKey::new("8f14e45fceea167a5a36dedd4bea2543");
        assert_eq!(key.friendly_id(), key.friendly_id());
        assert_eq!(key.friendly_id().len(), 6);
    }

    #[test]
    fn friendly_id_uses_unambiguous_chars() {
        let key = ApiKey::generate();
        for c in key.friendly_id().chars() {
            assert!(
                !"ILO01".contains(c),
                "ambiguous character '{}' in friendly id",
                c
            );
        }
    }

    #[test]
    fn distinct_keys_get_distinct_friendly_ids() {
        let a = ApiKey::new("key-one");
        let b = ApiKey::new("key-two");
        assert_ne!(a.friendly_id(), b.friendly_id());
    }
}
