//! Queue facade over the job store, adding backpressure policy.
//!
//! Workers and the dispatcher talk to this service rather than the store
//! directly so the demote-on-full rule lives in one place.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;

use crate::error::StoreError;
use crate::models::{JobStatus, RenderJob, PRIORITY_IMMEDIATE, PRIORITY_NORMAL};
use crate::store::jobs::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BACKOFF_SECS};
use crate::store::Store;

pub struct RenderQueue {
    store: Arc<Store>,
    /// Queue depth at which immediate schedules lose their priority boost.
    buffer: usize,
    max_attempts: u32,
    retry_backoff: ChronoDuration,
}

impl RenderQueue {
    pub fn new(store: Arc<Store>, buffer: usize) -> Self {
        Self {
            store,
            buffer,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: ChronoDuration::seconds(DEFAULT_RETRY_BACKOFF_SECS),
        }
    }

    /// Queue a normal-priority render at `when`.
    pub fn schedule(
        &self,
        plugin_instance_id: i64,
        when: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.store
            .schedule_job(plugin_instance_id, PRIORITY_NORMAL, when, Utc::now())
    }

    /// Queue an immediate render. Under backpressure the schedule succeeds
    /// but at normal priority — callers are never blocked or refused.
    pub fn schedule_immediate(&self, plugin_instance_id: i64) -> Result<bool, StoreError> {
        let now = Utc::now();
        let depth = self.store.queue_depth()?;
        let priority = if depth >= self.buffer {
            tracing::warn!(
                depth = depth,
                buffer = self.buffer,
                instance_id = plugin_instance_id,
                "Render queue saturated, demoting immediate schedule"
            );
            PRIORITY_NORMAL
        } else {
            PRIORITY_IMMEDIATE
        };
        self.store.schedule_job(plugin_instance_id, priority, now, now)
    }

    pub fn claim_next(&self, worker_id: &str) -> Result<Option<RenderJob>, StoreError> {
        self.store.claim_next_job(worker_id, Utc::now())
    }

    pub fn complete(
        &self,
        job_id: i64,
        success: bool,
        error: Option<&str>,
    ) -> Result<JobStatus, StoreError> {
        self.store.complete_job(
            job_id,
            success,
            error,
            Utc::now(),
            self.max_attempts,
            self.retry_backoff,
        )
    }

    /// Cancel pending work for an instance, e.g. on deactivation or a
    /// refresh-interval change.
    pub fn cancel_pending(&self, plugin_instance_id: i64) -> Result<usize, StoreError> {
        self.store.cancel_pending_jobs(plugin_instance_id)
    }

    pub fn cleanup(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        self.store.cleanup_jobs(older_than)
    }

    pub fn depth(&self) -> Result<usize, StoreError> {
        self.store.queue_depth()
    }
}
