//! Periodic housekeeping: terminal job rows, stale artifacts, orphan files.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::Store;

/// How often housekeeping runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
/// Terminal job rows older than this are deleted.
const JOB_RETENTION_HOURS: i64 = 24;
/// Artifacts survive this many refresh intervals before eviction.
const KEEP_INTERVALS: u32 = 2;
/// Files with no row must be at least this old before the orphan sweep
/// touches them, so an in-progress artifact write is never caught.
const ORPHAN_GRACE: Duration = Duration::from_secs(3600);

pub struct CleanupTask {
    store: Arc<Store>,
    static_dir: PathBuf,
}

impl CleanupTask {
    pub fn new(store: Arc<Store>, static_dir: PathBuf) -> Self {
        Self { store, static_dir }
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; skip it so startup stays quiet.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::warn!(error = %e, "Cleanup pass failed");
                        }
                    }
                }
            }
            tracing::debug!("Cleanup task stopped");
        })
    }

    pub async fn run_once(&self) -> anyhow::Result<()> {
        let now = Utc::now();

        let removed_jobs = self
            .store
            .cleanup_jobs(now - ChronoDuration::hours(JOB_RETENTION_HOURS))?;

        let stale = self.store.stale_artifacts(now, KEEP_INTERVALS)?;
        let evicted = stale.len();
        for artifact in stale {
            self.store.delete_artifact(artifact.id)?;
            if artifact.is_local() {
                let path = self.static_dir.join(&artifact.path);
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %path.display(), error = %e, "Artifact file removal failed");
                    }
                }
            }
        }

        let orphans = self.sweep_orphans().await?;

        if removed_jobs > 0 || evicted > 0 || orphans > 0 {
            tracing::info!(removed_jobs, evicted, orphans, "Cleanup pass finished");
        }
        Ok(())
    }

    /// Delete files under `rendered/` that no row references, once they
    /// have outlived the grace period.
    async fn sweep_orphans(&self) -> anyhow::Result<usize> {
        let rendered = self.static_dir.join("rendered");
        if !rendered.exists() {
            return Ok(0);
        }
        let referenced = self.store.all_artifact_paths()?;
        let mut removed = 0;
        let mut stack = vec![rendered];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if self.is_orphan(&path, &referenced).await {
                    if tokio::fs::remove_file(&path).await.is_ok() {
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }

    async fn is_orphan(&self, path: &Path, referenced: &HashSet<String>) -> bool {
        let relative = match path.strip_prefix(&self.static_dir) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => return false,
        };
        if referenced.contains(&relative) {
            return false;
        }
        match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => match modified.elapsed() {
                Ok(age) => age >= ORPHAN_GRACE,
                Err(_) => false,
            },
            Err(_) => false,
        }
    }
}
