//! The durable render queue.
//!
//! Coalescing is enforced by the partial unique index on
//! `render_jobs (plugin_instance_id) WHERE status = 'pending'`, so two
//! pending jobs for one instance cannot exist no matter how the schedule
//! call races. Claims run inside a transaction and skip instances with a
//! running job, which gives at-most-one-in-flight per instance.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;

use super::{parse_ts, ts, Store};
use crate::error::StoreError;
use crate::models::{JobStatus, RenderJob};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_SECS: i64 = 300;

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<(RenderJob, String, String, String, String)> {
    let scheduled_for: String = row.get(3)?;
    let status: String = row.get(4)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    Ok((
        RenderJob {
            id: row.get(0)?,
            plugin_instance_id: row.get(1)?,
            priority: row.get(2)?,
            scheduled_for: Utc::now(),
            status: JobStatus::Pending,
            attempts: row.get(5)?,
            worker_id: row.get(6)?,
            error: row.get(7)?,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        },
        scheduled_for,
        status,
        created_at,
        updated_at,
    ))
}

fn finish_job(
    pair: (RenderJob, String, String, String, String),
) -> Result<RenderJob, StoreError> {
    let (mut job, scheduled_for, status, created_at, updated_at) = pair;
    job.scheduled_for = parse_ts(&scheduled_for)?;
    job.status = JobStatus::parse(&status)
        .ok_or_else(|| StoreError::CorruptRow(format!("bad job status {status:?}")))?;
    job.created_at = parse_ts(&created_at)?;
    job.updated_at = parse_ts(&updated_at)?;
    Ok(job)
}

const JOB_COLS: &str = "id, plugin_instance_id, priority, scheduled_for, status, attempts, \
     worker_id, error, created_at, updated_at";

impl Store {
    /// Insert a pending job, coalescing with an existing one.
    ///
    /// A schedule against an instance that already has a pending job is
    /// dropped, except that a higher-priority schedule upgrades the pending
    /// job's priority and scheduled_for in place. Returns true when a row
    /// was inserted or upgraded.
    pub fn schedule_job(
        &self,
        plugin_instance_id: i64,
        priority: i64,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn.execute(
            "INSERT INTO render_jobs
                 (plugin_instance_id, priority, scheduled_for, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?4)
             ON CONFLICT (plugin_instance_id) WHERE status = 'pending'
             DO UPDATE SET
                 priority = excluded.priority,
                 scheduled_for = excluded.scheduled_for,
                 updated_at = excluded.updated_at
             WHERE excluded.priority > render_jobs.priority",
            params![plugin_instance_id, priority, ts(scheduled_for), ts(now)],
        )?;
        Ok(changed > 0)
    }

    /// Atomically move the best eligible pending job to running.
    ///
    /// Eligible: scheduled_for has passed and the instance has no running
    /// job. Best: highest priority, then earliest scheduled_for, then id.
    pub fn claim_next_job(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RenderJob>, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let candidate: Option<i64> = tx
            .query_row(
                "SELECT id FROM render_jobs
                 WHERE status = 'pending'
                   AND scheduled_for <= ?1
                   AND plugin_instance_id NOT IN (
                       SELECT plugin_instance_id FROM render_jobs WHERE status = 'running'
                   )
                 ORDER BY priority DESC, scheduled_for ASC, id ASC
                 LIMIT 1",
                params![ts(now)],
                |row| row.get(0),
            )
            .optional()?;

        let job = match candidate {
            Some(id) => {
                let updated = tx.execute(
                    "UPDATE render_jobs
                     SET status = 'running', worker_id = ?2, updated_at = ?3
                     WHERE id = ?1 AND status = 'pending'",
                    params![id, worker_id, ts(now)],
                )?;
                if updated == 1 {
                    tx.query_row(
                        &format!("SELECT {JOB_COLS} FROM render_jobs WHERE id = ?1"),
                        params![id],
                        row_to_job,
                    )
                    .optional()?
                } else {
                    None
                }
            }
            None => None,
        };

        tx.commit()?;
        job.map(finish_job).transpose()
    }

    /// Finish a running job. On failure the job retries at `now + backoff`
    /// while attempts remain, unless a newer pending job for the instance
    /// already exists (that one supersedes the retry). Returns the resulting
    /// status.
    pub fn complete_job(
        &self,
        job_id: i64,
        success: bool,
        error: Option<&str>,
        now: DateTime<Utc>,
        max_attempts: u32,
        backoff: Duration,
    ) -> Result<JobStatus, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        if success {
            tx.execute(
                "UPDATE render_jobs
                 SET status = 'completed', error = NULL, updated_at = ?2
                 WHERE id = ?1 AND status = 'running'",
                params![job_id, ts(now)],
            )?;
            tx.commit()?;
            return Ok(JobStatus::Completed);
        }

        let (instance_id, attempts): (i64, u32) = tx.query_row(
            "SELECT plugin_instance_id, attempts FROM render_jobs WHERE id = ?1",
            params![job_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let attempts = attempts + 1;

        let has_newer_pending: bool = tx.query_row(
            "SELECT EXISTS (
                 SELECT 1 FROM render_jobs
                 WHERE plugin_instance_id = ?1 AND status = 'pending'
             )",
            params![instance_id],
            |row| row.get(0),
        )?;

        let status = if attempts < max_attempts && !has_newer_pending {
            tx.execute(
                "UPDATE render_jobs
                 SET status = 'pending', attempts = ?2, error = ?3,
                     scheduled_for = ?4, updated_at = ?5
                 WHERE id = ?1 AND status = 'running'",
                params![job_id, attempts, error, ts(now + backoff), ts(now)],
            )?;
            JobStatus::Pending
        } else {
            tx.execute(
                "UPDATE render_jobs
                 SET status = 'failed', attempts = ?2, error = ?3, updated_at = ?4
                 WHERE id = ?1 AND status = 'running'",
                params![job_id, attempts, error, ts(now)],
            )?;
            JobStatus::Failed
        };

        tx.commit()?;
        Ok(status)
    }

    /// `pending → cancelled` for an instance; used when it is deactivated
    /// or its refresh interval changes. Running jobs are left to finish.
    pub fn cancel_pending_jobs(&self, plugin_instance_id: i64) -> Result<usize, StoreError> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE render_jobs
             SET status = 'cancelled', updated_at = ?2
             WHERE plugin_instance_id = ?1 AND status = 'pending'",
            params![plugin_instance_id, ts(Utc::now())],
        )?;
        Ok(n)
    }

    /// Delete terminal rows last touched before the cutoff.
    pub fn cleanup_jobs(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn();
        let n = conn.execute(
            "DELETE FROM render_jobs
             WHERE status IN ('completed', 'failed', 'cancelled')
               AND updated_at < ?1",
            params![ts(older_than)],
        )?;
        Ok(n)
    }

    pub fn get_job(&self, job_id: i64) -> Result<Option<RenderJob>, StoreError> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {JOB_COLS} FROM render_jobs WHERE id = ?1"),
            params![job_id],
            row_to_job,
        )
        .optional()?
        .map(finish_job)
        .transpose()
    }

    pub fn pending_job_for_instance(
        &self,
        plugin_instance_id: i64,
    ) -> Result<Option<RenderJob>, StoreError> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {JOB_COLS} FROM render_jobs
                 WHERE plugin_instance_id = ?1 AND status = 'pending'"
            ),
            params![plugin_instance_id],
            row_to_job,
        )
        .optional()?
        .map(finish_job)
        .transpose()
    }

    /// Pending + running rows; the backpressure measure.
    pub fn queue_depth(&self) -> Result<usize, StoreError> {
        let conn = self.conn();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM render_jobs WHERE status IN ('pending', 'running')",
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn job_counts(&self) -> Result<HashMap<String, i64>, StoreError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM render_jobs GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(counts)
    }
}
