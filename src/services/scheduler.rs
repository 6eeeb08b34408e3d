//! Background refresh scheduling.
//!
//! Devices only poll; plugins refresh on their own cadence. This loop
//! finds instances whose newest artifact has outlived the instance's
//! refresh interval and puts a normal-priority job on the queue for each.
//! Coalescing in the queue makes the pass idempotent.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::services::RenderQueue;
use crate::store::Store;

/// How often staleness is re-evaluated. Refresh intervals are minutes to
/// hours, so a minute of slack is invisible to devices.
const SCHEDULER_TICK: Duration = Duration::from_secs(60);

pub struct RefreshScheduler {
    store: Arc<Store>,
    queue: Arc<RenderQueue>,
}

impl RefreshScheduler {
    pub fn new(store: Arc<Store>, queue: Arc<RenderQueue>) -> Self {
        Self { store, queue }
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SCHEDULER_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.run_once() {
                            Ok(scheduled) if scheduled > 0 => {
                                tracing::debug!(scheduled, "Scheduled stale instances for re-render");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "Refresh scheduling failed"),
                        }
                    }
                }
            }
            tracing::debug!("Refresh scheduler stopped");
        })
    }

    pub fn run_once(&self) -> anyhow::Result<usize> {
        let now = Utc::now();
        let due = self.store.instances_needing_render(now)?;
        let mut scheduled = 0;
        for instance_id in due {
            if self.queue.schedule(instance_id, now)? {
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }
}
