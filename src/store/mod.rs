//! SQLite persistence.
//!
//! One [`Store`] wraps a single connection behind a mutex; the schema is
//! created idempotently at open. Each domain area lives in its own module
//! as an `impl Store` block. Timestamps are RFC3339 TEXT in UTC with
//! millisecond precision, which keeps lexicographic and chronological order
//! identical for SQL comparisons.

pub mod artifacts;
pub mod devices;
pub mod firmware;
pub mod jobs;
pub mod logs;
pub mod playlists;
pub mod plugins;

pub use logs::DeviceLogEntry;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

/// Serialize a timestamp for storage.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp.
pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow(format!("bad timestamp {s:?}: {e}")))
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id       INTEGER PRIMARY KEY,
            timezone TEXT
        );

        CREATE TABLE IF NOT EXISTS device_models (
            id          INTEGER PRIMARY KEY,
            name        TEXT NOT NULL,
            version     INTEGER NOT NULL,
            width       INTEGER NOT NULL,
            height      INTEGER NOT NULL,
            bit_depth   INTEGER NOT NULL,
            color_depth INTEGER NOT NULL,
            UNIQUE (name, version)
        );

        CREATE TABLE IF NOT EXISTS playlists (
            id      INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users (id),
            name    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS plugin_instances (
            id               INTEGER PRIMARY KEY,
            user_id          INTEGER NOT NULL REFERENCES users (id),
            plugin_type      TEXT NOT NULL,
            name             TEXT NOT NULL,
            settings         TEXT NOT NULL DEFAULT '{}',
            refresh_interval INTEGER NOT NULL DEFAULT 900
        );

        CREATE TABLE IF NOT EXISTS playlist_items (
            id                 INTEGER PRIMARY KEY,
            playlist_id        INTEGER NOT NULL REFERENCES playlists (id) ON DELETE CASCADE,
            plugin_instance_id INTEGER NOT NULL REFERENCES plugin_instances (id),
            position           INTEGER NOT NULL,
            active             INTEGER NOT NULL DEFAULT 1,
            duration_override  INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_playlist_items_playlist
            ON playlist_items (playlist_id, position);

        CREATE TABLE IF NOT EXISTS item_schedules (
            id               INTEGER PRIMARY KEY,
            playlist_item_id INTEGER NOT NULL REFERENCES playlist_items (id) ON DELETE CASCADE,
            days_of_week     INTEGER NOT NULL,
            start_time       TEXT NOT NULL,
            end_time         TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS devices (
            id                     INTEGER PRIMARY KEY,
            mac                    TEXT NOT NULL UNIQUE,
            api_key                TEXT NOT NULL UNIQUE,
            friendly_id            TEXT NOT NULL,
            user_id                INTEGER REFERENCES users (id),
            playlist_id            INTEGER REFERENCES playlists (id),
            model_id               INTEGER REFERENCES device_models (id),
            firmware_version       TEXT NOT NULL DEFAULT '',
            battery_voltage        REAL,
            rssi                   INTEGER,
            last_seen              TEXT,
            refresh_rate           INTEGER NOT NULL DEFAULT 900,
            allow_firmware_updates INTEGER NOT NULL DEFAULT 0,
            firmware_window_start  TEXT NOT NULL DEFAULT '',
            firmware_window_end    TEXT NOT NULL DEFAULT '',
            sleep_window_start     TEXT NOT NULL DEFAULT '',
            sleep_window_end       TEXT NOT NULL DEFAULT '',
            sleep_enabled          INTEGER NOT NULL DEFAULT 0,
            sleep_show_screen      INTEGER NOT NULL DEFAULT 0,
            last_playlist_item_id  INTEGER
        );

        CREATE TABLE IF NOT EXISTS rendered_artifacts (
            id                 INTEGER PRIMARY KEY,
            plugin_instance_id INTEGER NOT NULL REFERENCES plugin_instances (id),
            width              INTEGER NOT NULL,
            height             INTEGER NOT NULL,
            bit_depth          INTEGER NOT NULL,
            path               TEXT NOT NULL,
            rendered_at        TEXT NOT NULL,
            content_hash       TEXT NOT NULL,
            UNIQUE (plugin_instance_id, width, height, bit_depth)
        );

        CREATE TABLE IF NOT EXISTS render_jobs (
            id                 INTEGER PRIMARY KEY,
            plugin_instance_id INTEGER NOT NULL REFERENCES plugin_instances (id),
            priority           INTEGER NOT NULL DEFAULT 0,
            scheduled_for      TEXT NOT NULL,
            status             TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending','running','completed','failed','cancelled')),
            attempts           INTEGER NOT NULL DEFAULT 0,
            worker_id          TEXT,
            error              TEXT,
            created_at         TEXT NOT NULL,
            updated_at         TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS ux_render_jobs_pending
            ON render_jobs (plugin_instance_id)
            WHERE status = 'pending';
        CREATE INDEX IF NOT EXISTS idx_render_jobs_claim
            ON render_jobs (status, scheduled_for);

        CREATE TABLE IF NOT EXISTS firmware_versions (
            id              INTEGER PRIMARY KEY,
            version         TEXT NOT NULL UNIQUE,
            download_url    TEXT,
            file_path       TEXT,
            is_latest       INTEGER NOT NULL DEFAULT 0,
            download_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (download_status IN ('pending','downloading','downloaded','failed')),
            progress        INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS device_logs (
            id        INTEGER PRIMARY KEY,
            device_id INTEGER NOT NULL REFERENCES devices (id),
            level     TEXT NOT NULL,
            message   TEXT NOT NULL DEFAULT '',
            raw       TEXT NOT NULL DEFAULT '{}',
            logged_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_device_logs_device
            ON device_logs (device_id, logged_at);",
    )?;
    Ok(())
}

impl Store {
    pub fn create_user(&self, timezone: Option<&str>) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO users (timezone) VALUES (?1)",
            rusqlite::params![timezone],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn user_timezone(&self, user_id: i64) -> Result<Option<String>, StoreError> {
        use rusqlite::OptionalExtension;
        let conn = self.conn();
        let tz: Option<Option<String>> = conn
            .query_row(
                "SELECT timezone FROM users WHERE id = ?1",
                rusqlite::params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(tz.flatten())
    }
}
