//! Plugin-instance persistence. Settings are stored as JSON text; schema
//! validation happens in the plugin layer before rows are written.

use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use super::Store;
use crate::error::StoreError;
use crate::models::PluginInstance;

fn row_to_instance(row: &Row<'_>) -> rusqlite::Result<(PluginInstance, String)> {
    let settings_text: String = row.get(4)?;
    Ok((
        PluginInstance {
            id: row.get(0)?,
            user_id: row.get(1)?,
            plugin_type: row.get(2)?,
            name: row.get(3)?,
            settings: Value::Null,
            refresh_interval: row.get(5)?,
        },
        settings_text,
    ))
}

fn finish_instance(pair: (PluginInstance, String)) -> Result<PluginInstance, StoreError> {
    let (mut instance, text) = pair;
    instance.settings = serde_json::from_str(&text)
        .map_err(|e| StoreError::CorruptRow(format!("bad settings JSON: {e}")))?;
    Ok(instance)
}

impl Store {
    pub fn create_plugin_instance(
        &self,
        user_id: i64,
        plugin_type: &str,
        name: &str,
        settings: &Value,
        refresh_interval: u32,
    ) -> Result<PluginInstance, StoreError> {
        let text = settings.to_string();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO plugin_instances (user_id, plugin_type, name, settings, refresh_interval)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, plugin_type, name, text, refresh_interval],
        )?;
        Ok(PluginInstance {
            id: conn.last_insert_rowid(),
            user_id,
            plugin_type: plugin_type.to_string(),
            name: name.to_string(),
            settings: settings.clone(),
            refresh_interval,
        })
    }

    pub fn get_plugin_instance(&self, id: i64) -> Result<Option<PluginInstance>, StoreError> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, user_id, plugin_type, name, settings, refresh_interval
             FROM plugin_instances WHERE id = ?1",
            params![id],
            row_to_instance,
        )
        .optional()?
        .map(finish_instance)
        .transpose()
    }

    pub fn update_instance_settings(&self, id: i64, settings: &Value) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE plugin_instances SET settings = ?2 WHERE id = ?1",
            params![id, settings.to_string()],
        )?;
        Ok(())
    }

    pub fn set_instance_refresh_interval(
        &self,
        id: i64,
        refresh_interval: u32,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE plugin_instances SET refresh_interval = ?2 WHERE id = ?1",
            params![id, refresh_interval],
        )?;
        Ok(())
    }

    /// Instances due for a background re-render: nothing in flight on the
    /// queue, and the newest artifact (if any) has outlived the instance's
    /// refresh interval. Feeds the periodic scheduler. Staleness is
    /// compared per row because the interval is per instance.
    pub fn instances_needing_render(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<i64>, StoreError> {
        let candidates = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT p.id, p.refresh_interval,
                        (SELECT MAX(a.rendered_at) FROM rendered_artifacts a
                         WHERE a.plugin_instance_id = p.id) AS newest
                 FROM plugin_instances p
                 WHERE NOT EXISTS (
                     SELECT 1 FROM render_jobs j
                     WHERE j.plugin_instance_id = p.id AND j.status IN ('pending', 'running')
                 )
                 ORDER BY p.id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut due = Vec::new();
        for (id, refresh_interval, newest) in candidates {
            let stale = match newest.as_deref().map(super::parse_ts).transpose()? {
                Some(rendered_at) => {
                    (now - rendered_at).num_seconds() >= i64::from(refresh_interval)
                }
                None => true,
            };
            if stale {
                due.push(id);
            }
        }
        Ok(due)
    }
}
