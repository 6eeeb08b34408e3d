//! Firmware release rows.

use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::error::StoreError;
use crate::models::{DownloadStatus, FirmwareVersion, Version};

fn row_to_firmware(row: &Row<'_>) -> rusqlite::Result<(FirmwareVersion, String)> {
    let status: String = row.get(5)?;
    Ok((
        FirmwareVersion {
            id: row.get(0)?,
            version: Version::new(row.get::<_, String>(1)?),
            download_url: row.get(2)?,
            file_path: row.get(3)?,
            is_latest: row.get(4)?,
            download_status: DownloadStatus::Pending,
            progress: row.get::<_, i64>(6)? as u8,
        },
        status,
    ))
}

fn finish_firmware(pair: (FirmwareVersion, String)) -> FirmwareVersion {
    let (mut fw, status) = pair;
    fw.download_status = DownloadStatus::parse(&status);
    fw
}

const FW_COLS: &str = "id, version, download_url, file_path, is_latest, download_status, progress";

impl Store {
    /// Record a discovered release; an existing row keeps its download
    /// state but refreshes the URL.
    pub fn upsert_firmware(
        &self,
        version: &Version,
        download_url: Option<&str>,
    ) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO firmware_versions (version, download_url)
             VALUES (?1, ?2)
             ON CONFLICT (version) DO UPDATE SET
                 download_url = COALESCE(excluded.download_url, firmware_versions.download_url)",
            params![version.as_str(), download_url],
        )?;
        let id = conn.query_row(
            "SELECT id FROM firmware_versions WHERE version = ?1",
            params![version.as_str()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Flip the single is_latest flag to the given version, atomically.
    pub fn set_latest_firmware(&self, version: &Version) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("UPDATE firmware_versions SET is_latest = 0", [])?;
        let n = tx.execute(
            "UPDATE firmware_versions SET is_latest = 1 WHERE version = ?1",
            params![version.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::CorruptRow(format!(
                "unknown firmware version {version}"
            )));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn latest_firmware(&self) -> Result<Option<FirmwareVersion>, StoreError> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                &format!("SELECT {FW_COLS} FROM firmware_versions WHERE is_latest = 1"),
                [],
                row_to_firmware,
            )
            .optional()?
            .map(finish_firmware))
    }

    pub fn get_firmware(&self, version: &Version) -> Result<Option<FirmwareVersion>, StoreError> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                &format!("SELECT {FW_COLS} FROM firmware_versions WHERE version = ?1"),
                params![version.as_str()],
                row_to_firmware,
            )
            .optional()?
            .map(finish_firmware))
    }

    pub fn set_firmware_download(
        &self,
        version: &Version,
        status: DownloadStatus,
        progress: u8,
        file_path: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE firmware_versions
             SET download_status = ?2, progress = ?3,
                 file_path = COALESCE(?4, file_path)
             WHERE version = ?1",
            params![
                version.as_str(),
                status.as_str(),
                progress as i64,
                file_path
            ],
        )?;
        Ok(())
    }

    pub fn all_firmware_versions(&self) -> Result<Vec<FirmwareVersion>, StoreError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {FW_COLS} FROM firmware_versions ORDER BY id"))?;
        let rows = stmt
            .query_map([], row_to_firmware)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().map(finish_firmware).collect())
    }
}
