//! Device and device-model persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_ts, ts, Store};
use crate::error::StoreError;
use crate::models::device::DeviceStatus;
use crate::models::{ApiKey, Device, DeviceId, DeviceModel};

fn row_to_device(row: &Row<'_>) -> rusqlite::Result<(Device, Option<String>)> {
    let last_seen: Option<String> = row.get("last_seen")?;
    let device = Device {
        id: row.get("id")?,
        mac: DeviceId::new(row.get::<_, String>("mac")?),
        api_key: ApiKey::new(row.get::<_, String>("api_key")?),
        friendly_id: row.get("friendly_id")?,
        user_id: row.get("user_id")?,
        playlist_id: row.get("playlist_id")?,
        model_id: row.get("model_id")?,
        firmware_version: row.get("firmware_version")?,
        battery_voltage: row.get("battery_voltage")?,
        rssi: row.get("rssi")?,
        last_seen: None,
        refresh_rate: row.get("refresh_rate")?,
        allow_firmware_updates: row.get("allow_firmware_updates")?,
        firmware_window_start: row.get("firmware_window_start")?,
        firmware_window_end: row.get("firmware_window_end")?,
        sleep_window_start: row.get("sleep_window_start")?,
        sleep_window_end: row.get("sleep_window_end")?,
        sleep_enabled: row.get("sleep_enabled")?,
        sleep_show_screen: row.get("sleep_show_screen")?,
        last_playlist_item_id: row.get("last_playlist_item_id")?,
    };
    Ok((device, last_seen))
}

fn finish_device(pair: (Device, Option<String>)) -> Result<Device, StoreError> {
    let (mut device, last_seen) = pair;
    device.last_seen = last_seen.as_deref().map(parse_ts).transpose()?;
    Ok(device)
}

const DEVICE_COLS: &str = "id, mac, api_key, friendly_id, user_id, playlist_id, model_id, \
     firmware_version, battery_voltage, rssi, last_seen, refresh_rate, \
     allow_firmware_updates, firmware_window_start, firmware_window_end, \
     sleep_window_start, sleep_window_end, sleep_enabled, sleep_show_screen, \
     last_playlist_item_id";

impl Store {
    /// Register a new unclaimed device. Generates the API key and friendly
    /// id; the caller decides the model.
    pub fn create_device(
        &self,
        mac: &DeviceId,
        model_id: Option<i64>,
        firmware_version: &str,
    ) -> Result<Device, StoreError> {
        let api_key = ApiKey::generate();
        let friendly_id = api_key.friendly_id();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO devices (mac, api_key, friendly_id, model_id, firmware_version)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                mac.as_str(),
                api_key.as_str(),
                friendly_id,
                model_id,
                firmware_version
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_device(id)?
            .ok_or_else(|| StoreError::CorruptRow("device vanished after insert".into()))
    }

    pub fn get_device(&self, id: i64) -> Result<Option<Device>, StoreError> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {DEVICE_COLS} FROM devices WHERE id = ?1"),
            params![id],
            row_to_device,
        )
        .optional()?
        .map(finish_device)
        .transpose()
    }

    pub fn find_device_by_mac(&self, mac: &DeviceId) -> Result<Option<Device>, StoreError> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {DEVICE_COLS} FROM devices WHERE mac = ?1"),
            params![mac.as_str()],
            row_to_device,
        )
        .optional()?
        .map(finish_device)
        .transpose()
    }

    pub fn find_device_by_api_key(&self, api_key: &str) -> Result<Option<Device>, StoreError> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {DEVICE_COLS} FROM devices WHERE api_key = ?1"),
            params![api_key],
            row_to_device,
        )
        .optional()?
        .map(finish_device)
        .transpose()
    }

    /// Full-row update for policy fields (windows, rates, flags).
    pub fn update_device(&self, device: &Device) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE devices SET
                user_id = ?2, playlist_id = ?3, model_id = ?4,
                refresh_rate = ?5, allow_firmware_updates = ?6,
                firmware_window_start = ?7, firmware_window_end = ?8,
                sleep_window_start = ?9, sleep_window_end = ?10,
                sleep_enabled = ?11, sleep_show_screen = ?12
             WHERE id = ?1",
            params![
                device.id,
                device.user_id,
                device.playlist_id,
                device.model_id,
                device.refresh_rate,
                device.allow_firmware_updates,
                device.firmware_window_start,
                device.firmware_window_end,
                device.sleep_window_start,
                device.sleep_window_end,
                device.sleep_enabled,
                device.sleep_show_screen,
            ],
        )?;
        Ok(())
    }

    /// Deferred status write from poll headers. Only reported fields
    /// change; the reported Refresh-Rate is telemetry and never touches
    /// the device's configured default.
    pub fn update_device_status(
        &self,
        device_id: i64,
        status: &DeviceStatus,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE devices SET
                battery_voltage = COALESCE(?2, battery_voltage),
                rssi = COALESCE(?3, rssi),
                firmware_version = COALESCE(?4, firmware_version),
                last_seen = ?5
             WHERE id = ?1",
            params![
                device_id,
                status.battery_voltage,
                status.rssi,
                status.firmware_version,
                ts(seen_at),
            ],
        )?;
        Ok(())
    }

    /// Rotation cursor write; last writer wins by design.
    pub fn set_rotation_cursor(
        &self,
        device_id: i64,
        item_id: Option<i64>,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE devices SET last_playlist_item_id = ?2 WHERE id = ?1",
            params![device_id, item_id],
        )?;
        Ok(())
    }

    pub fn set_device_firmware_version(
        &self,
        device_id: i64,
        version: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE devices SET firmware_version = ?2 WHERE id = ?1",
            params![device_id, version],
        )?;
        Ok(())
    }

    pub fn claim_device(&self, device_id: i64, user_id: i64) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE devices SET user_id = ?2 WHERE id = ?1",
            params![device_id, user_id],
        )?;
        Ok(())
    }

    pub fn assign_playlist(&self, device_id: i64, playlist_id: i64) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE devices SET playlist_id = ?2 WHERE id = ?1",
            params![device_id, playlist_id],
        )?;
        Ok(())
    }

    /// Distinct display geometries of devices whose playlist references the
    /// instance. Workers render one artifact per geometry.
    pub fn dimensions_for_instance(
        &self,
        instance_id: i64,
    ) -> Result<Vec<(u32, u32, u32)>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT m.width, m.height, m.bit_depth
             FROM devices d
             JOIN playlist_items i ON i.playlist_id = d.playlist_id
             JOIN device_models m ON m.id = d.model_id
             WHERE i.plugin_instance_id = ?1",
        )?;
        let dims = stmt
            .query_map(params![instance_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(dims)
    }

    /// Some device whose playlist references the instance; workers use it as
    /// the plugin context device.
    pub fn device_for_instance(&self, instance_id: i64) -> Result<Option<Device>, StoreError> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {DEVICE_COLS} FROM devices
                 WHERE playlist_id IN (
                     SELECT playlist_id FROM playlist_items WHERE plugin_instance_id = ?1
                 )
                 ORDER BY id LIMIT 1"
            ),
            params![instance_id],
            row_to_device,
        )
        .optional()?
        .map(finish_device)
        .transpose()
    }

    // --- device models ---

    pub fn upsert_device_model(&self, model: &DeviceModel) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO device_models (name, version, width, height, bit_depth, color_depth)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (name, version) DO NOTHING",
            params![
                model.name,
                model.version,
                model.width,
                model.height,
                model.bit_depth,
                model.color_depth
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM device_models WHERE name = ?1 AND version = ?2",
            params![model.name, model.version],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Newest version row for a model name.
    pub fn find_device_model(&self, name: &str) -> Result<Option<DeviceModel>, StoreError> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT id, name, version, width, height, bit_depth, color_depth
                 FROM device_models WHERE name = ?1
                 ORDER BY version DESC LIMIT 1",
                params![name],
                row_to_model,
            )
            .optional()?)
    }

    pub fn get_device_model(&self, id: i64) -> Result<Option<DeviceModel>, StoreError> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT id, name, version, width, height, bit_depth, color_depth
                 FROM device_models WHERE id = ?1",
                params![id],
                row_to_model,
            )
            .optional()?)
    }

    /// The device's model row, or the built-in fallback geometry.
    pub fn model_for_device(&self, device: &Device) -> Result<DeviceModel, StoreError> {
        match device.model_id {
            Some(id) => Ok(self
                .get_device_model(id)?
                .unwrap_or_else(DeviceModel::fallback)),
            None => Ok(DeviceModel::fallback()),
        }
    }
}

fn row_to_model(row: &Row<'_>) -> rusqlite::Result<DeviceModel> {
    Ok(DeviceModel {
        id: row.get(0)?,
        name: row.get(1)?,
        version: row.get(2)?,
        width: row.get(3)?,
        height: row.get(4)?,
        bit_depth: row.get(5)?,
        color_depth: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn create_and_find_device() {
        let s = store();
        let mac = DeviceId::new("AA:BB:CC:00:01:02");
        let created = s.create_device(&mac, None, "1.7.1").unwrap();
        assert!(!created.is_claimed());
        assert_eq!(created.api_key.as_str().len(), 32);

        let by_mac = s.find_device_by_mac(&mac).unwrap().unwrap();
        assert_eq!(by_mac.id, created.id);

        let by_key = s
            .find_device_by_api_key(created.api_key.as_str())
            .unwrap()
            .unwrap();
        assert_eq!(by_key.id, created.id);
    }

    #[test]
    fn mac_is_unique() {
        let s = store();
        let mac = DeviceId::new("AA:BB:CC:00:01:02");
        s.create_device(&mac, None, "1.0.0").unwrap();
        assert!(s.create_device(&mac, None, "1.0.0").is_err());
    }

    #[test]
    fn status_update_keeps_unreported_fields() {
        let s = store();
        let mac = DeviceId::new("AA:BB:CC:00:01:02");
        let d = s.create_device(&mac, None, "1.0.0").unwrap();
        let now = Utc::now();

        s.update_device_status(
            d.id,
            &DeviceStatus {
                battery_voltage: Some(3.9),
                rssi: Some(-61),
                ..Default::default()
            },
            now,
        )
        .unwrap();
        // Second poll reports only rssi; battery must survive.
        s.update_device_status(
            d.id,
            &DeviceStatus {
                rssi: Some(-70),
                ..Default::default()
            },
            now,
        )
        .unwrap();

        let d = s.get_device(d.id).unwrap().unwrap();
        assert_eq!(d.battery_voltage, Some(3.9));
        assert_eq!(d.rssi, Some(-70));
        assert!(d.last_seen.is_some());
    }

    #[test]
    fn rotation_cursor_round_trip() {
        let s = store();
        let mac = DeviceId::new("AA:BB:CC:00:01:02");
        let d = s.create_device(&mac, None, "1.0.0").unwrap();
        s.set_rotation_cursor(d.id, Some(42)).unwrap();
        assert_eq!(
            s.get_device(d.id).unwrap().unwrap().last_playlist_item_id,
            Some(42)
        );
        s.set_rotation_cursor(d.id, None).unwrap();
        assert_eq!(
            s.get_device(d.id).unwrap().unwrap().last_playlist_item_id,
            None
        );
    }

    #[test]
    fn model_upsert_keeps_versions() {
        let s = store();
        let mut og = DeviceModel {
            id: 0,
            name: "og".into(),
            version: 1,
            width: 800,
            height: 480,
            bit_depth: 1,
            color_depth: 2,
        };
        let v1 = s.upsert_device_model(&og).unwrap();
        // Same (name, version) is a no-op.
        assert_eq!(s.upsert_device_model(&og).unwrap(), v1);

        og.version = 2;
        og.bit_depth = 2;
        let v2 = s.upsert_device_model(&og).unwrap();
        assert_ne!(v1, v2);

        // Lookup by name returns the newest version.
        let found = s.find_device_model("og").unwrap().unwrap();
        assert_eq!(found.version, 2);
        // The superseded row is still there.
        assert!(s.get_device_model(v1).unwrap().is_some());
    }

    #[test]
    fn fallback_model_for_modelless_device() {
        let s = store();
        let d = s
            .create_device(&DeviceId::new("AA:BB:CC:00:01:02"), None, "1.0.0")
            .unwrap();
        let m = s.model_for_device(&d).unwrap();
        assert_eq!((m.width, m.height), (800, 480));
    }
}
