//! Playlist, item, and schedule persistence.

use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::error::StoreError;
use crate::models::{Playlist, PlaylistItem, ScheduleEntry};

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<PlaylistItem> {
    Ok(PlaylistItem {
        id: row.get(0)?,
        playlist_id: row.get(1)?,
        plugin_instance_id: row.get(2)?,
        position: row.get(3)?,
        active: row.get(4)?,
        duration_override: row.get(5)?,
        schedules: Vec::new(),
    })
}

impl Store {
    pub fn create_playlist(&self, user_id: i64, name: &str) -> Result<Playlist, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO playlists (user_id, name) VALUES (?1, ?2)",
            params![user_id, name],
        )?;
        Ok(Playlist {
            id: conn.last_insert_rowid(),
            user_id,
            name: name.to_string(),
        })
    }

    pub fn add_playlist_item(
        &self,
        playlist_id: i64,
        plugin_instance_id: i64,
        position: i64,
        duration_override: Option<u32>,
    ) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO playlist_items
                 (playlist_id, plugin_instance_id, position, active, duration_override)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![playlist_id, plugin_instance_id, position, duration_override],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_item_schedule(
        &self,
        playlist_item_id: i64,
        schedule: &ScheduleEntry,
    ) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO item_schedules (playlist_item_id, days_of_week, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                playlist_item_id,
                schedule.days_of_week,
                schedule.start,
                schedule.end
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn set_item_active(&self, item_id: i64, active: bool) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE playlist_items SET active = ?2 WHERE id = ?1",
            params![item_id, active],
        )?;
        Ok(())
    }

    pub fn get_playlist_item(&self, item_id: i64) -> Result<Option<PlaylistItem>, StoreError> {
        let conn = self.conn();
        let item = conn
            .query_row(
                "SELECT id, playlist_id, plugin_instance_id, position, active, duration_override
                 FROM playlist_items WHERE id = ?1",
                params![item_id],
                row_to_item,
            )
            .optional()?;
        drop(conn);
        match item {
            Some(mut item) => {
                item.schedules = self.schedules_for_item(item.id)?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// All items of a playlist in position order, schedules attached.
    pub fn items_for_playlist(&self, playlist_id: i64) -> Result<Vec<PlaylistItem>, StoreError> {
        let mut items = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT id, playlist_id, plugin_instance_id, position, active, duration_override
                 FROM playlist_items
                 WHERE playlist_id = ?1
                 ORDER BY position ASC, id ASC",
            )?;
            let items = stmt
                .query_map(params![playlist_id], row_to_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            items
        };
        for item in &mut items {
            item.schedules = self.schedules_for_item(item.id)?;
        }
        Ok(items)
    }

    fn schedules_for_item(&self, item_id: i64) -> Result<Vec<ScheduleEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT days_of_week, start_time, end_time
             FROM item_schedules WHERE playlist_item_id = ?1 ORDER BY id",
        )?;
        let schedules = stmt
            .query_map(params![item_id], |row| {
                Ok(ScheduleEntry {
                    days_of_week: row.get(0)?,
                    start: row.get(1)?,
                    end: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(schedules)
    }
}
