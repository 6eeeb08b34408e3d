//! Rendered-artifact rows.
//!
//! One row per (instance, width, height, bit_depth); re-renders replace the
//! row and hand the superseded file path back to the caller for deletion,
//! so the row update and the file swap stay in one store call.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashSet;

use super::{parse_ts, ts, Store};
use crate::error::StoreError;
use crate::models::{ArtifactKey, RenderedArtifact};

fn row_to_artifact(row: &Row<'_>) -> rusqlite::Result<(RenderedArtifact, String)> {
    let rendered_at: String = row.get(6)?;
    Ok((
        RenderedArtifact {
            id: row.get(0)?,
            plugin_instance_id: row.get(1)?,
            width: row.get(2)?,
            height: row.get(3)?,
            bit_depth: row.get(4)?,
            path: row.get(5)?,
            rendered_at: Utc::now(),
            content_hash: row.get(7)?,
        },
        rendered_at,
    ))
}

fn finish_artifact(pair: (RenderedArtifact, String)) -> Result<RenderedArtifact, StoreError> {
    let (mut artifact, rendered_at) = pair;
    artifact.rendered_at = parse_ts(&rendered_at)?;
    Ok(artifact)
}

const ARTIFACT_COLS: &str =
    "id, plugin_instance_id, width, height, bit_depth, path, rendered_at, content_hash";

impl Store {
    /// Replace the artifact for a key. Returns the superseded file path, if
    /// any, so the worker can unlink it after the row is committed.
    pub fn upsert_artifact(
        &self,
        key: &ArtifactKey,
        path: &str,
        content_hash: &str,
        rendered_at: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let previous: Option<String> = tx
            .query_row(
                "SELECT path FROM rendered_artifacts
                 WHERE plugin_instance_id = ?1 AND width = ?2 AND height = ?3 AND bit_depth = ?4",
                params![key.plugin_instance_id, key.width, key.height, key.bit_depth],
                |row| row.get(0),
            )
            .optional()?;

        tx.execute(
            "INSERT INTO rendered_artifacts
                 (plugin_instance_id, width, height, bit_depth, path, rendered_at, content_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (plugin_instance_id, width, height, bit_depth)
             DO UPDATE SET
                 path = excluded.path,
                 rendered_at = excluded.rendered_at,
                 content_hash = excluded.content_hash",
            params![
                key.plugin_instance_id,
                key.width,
                key.height,
                key.bit_depth,
                path,
                ts(rendered_at),
                content_hash
            ],
        )?;

        tx.commit()?;
        Ok(previous.filter(|p| p != path))
    }

    pub fn get_artifact(&self, key: &ArtifactKey) -> Result<Option<RenderedArtifact>, StoreError> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {ARTIFACT_COLS} FROM rendered_artifacts
                 WHERE plugin_instance_id = ?1 AND width = ?2 AND height = ?3 AND bit_depth = ?4"
            ),
            params![key.plugin_instance_id, key.width, key.height, key.bit_depth],
            row_to_artifact,
        )
        .optional()?
        .map(finish_artifact)
        .transpose()
    }

    /// The most recently rendered artifact for an instance at any geometry.
    pub fn newest_artifact_for_instance(
        &self,
        plugin_instance_id: i64,
    ) -> Result<Option<RenderedArtifact>, StoreError> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {ARTIFACT_COLS} FROM rendered_artifacts
                 WHERE plugin_instance_id = ?1
                 ORDER BY rendered_at DESC, id DESC LIMIT 1"
            ),
            params![plugin_instance_id],
            row_to_artifact,
        )
        .optional()?
        .map(finish_artifact)
        .transpose()
    }

    /// Smart-cleanup candidates: rows older than `keep_intervals` times the
    /// owning instance's refresh interval, excluding the newest row of each
    /// instance. The caller deletes the returned rows' files.
    pub fn stale_artifacts(
        &self,
        now: DateTime<Utc>,
        keep_intervals: u32,
    ) -> Result<Vec<RenderedArtifact>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ARTIFACT_COLS} FROM rendered_artifacts a
             WHERE a.id NOT IN (
                 SELECT b.id FROM rendered_artifacts b
                 WHERE b.plugin_instance_id = a.plugin_instance_id
                 ORDER BY b.rendered_at DESC, b.id DESC LIMIT 1
             )"
        ))?;
        let rows = stmt
            .query_map([], row_to_artifact)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        let mut stale = Vec::new();
        for pair in rows {
            let artifact = finish_artifact(pair)?;
            let interval = self
                .get_plugin_instance(artifact.plugin_instance_id)?
                .map(|i| i.refresh_interval)
                .unwrap_or(0);
            let horizon = i64::from(keep_intervals) * i64::from(interval.max(1));
            if (now - artifact.rendered_at).num_seconds() > horizon {
                stale.push(artifact);
            }
        }
        Ok(stale)
    }

    pub fn delete_artifact(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute("DELETE FROM rendered_artifacts WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Every path currently referenced by a row; used by the orphan-file
    /// sweep to decide what on disk is garbage.
    pub fn all_artifact_paths(&self) -> Result<HashSet<String>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT path FROM rendered_artifacts")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(paths)
    }
}
