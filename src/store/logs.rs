//! Device log persistence for `POST /api/logs`.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{parse_ts, ts, Store};
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct DeviceLogEntry {
    pub id: i64,
    pub device_id: i64,
    pub level: String,
    pub message: String,
    pub raw: String,
    pub logged_at: DateTime<Utc>,
}

impl Store {
    pub fn insert_device_log(
        &self,
        device_id: i64,
        level: &str,
        message: &str,
        raw: &serde_json::Value,
        logged_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO device_logs (device_id, level, message, raw, logged_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![device_id, level, message, raw.to_string(), ts(logged_at)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn recent_device_logs(
        &self,
        device_id: i64,
        limit: usize,
    ) -> Result<Vec<DeviceLogEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, device_id, level, message, raw, logged_at
             FROM device_logs
             WHERE device_id = ?1
             ORDER BY logged_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![device_id, limit as i64], |row| {
                Ok((
                    DeviceLogEntry {
                        id: row.get(0)?,
                        device_id: row.get(1)?,
                        level: row.get(2)?,
                        message: row.get(3)?,
                        raw: row.get(4)?,
                        logged_at: Utc::now(),
                    },
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(mut entry, at)| {
                entry.logged_at = parse_ts(&at)?;
                Ok(entry)
            })
            .collect()
    }
}
