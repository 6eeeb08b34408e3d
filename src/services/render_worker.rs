//! The render worker pool.
//!
//! W workers drain the durable queue: claim, execute the plugin under a
//! deadline, assemble HTML, rasterize, and publish the artifact. Claim
//! contention and per-instance exclusivity are handled by the queue itself;
//! workers stay oblivious to each other.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::RenderError;
use crate::models::{ArtifactKey, RenderJob};
use crate::plugins::{ImageSource, PluginContext, PluginRegistry, PluginResponse};
use crate::services::{HtmlRenderer, Rasterizer, RenderQueue};
use crate::store::Store;

/// Hard ceiling on a single job, plugin fetch included.
const JOB_DEADLINE: Duration = Duration::from_secs(60);
/// Grace period for in-flight jobs at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
/// Idle backoff bounds; the actual sleep is jittered inside this range.
const IDLE_BACKOFF_MIN_MS: u64 = 200;
const IDLE_BACKOFF_MAX_MS: u64 = 1000;

pub struct WorkerContext {
    pub store: Arc<Store>,
    pub queue: Arc<RenderQueue>,
    pub registry: Arc<PluginRegistry>,
    pub html: Arc<HtmlRenderer>,
    pub rasterizer: Arc<dyn Rasterizer>,
    /// Base directory artifacts are written under; rows store paths
    /// relative to it.
    pub static_dir: PathBuf,
}

pub struct RenderWorkerPool {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl RenderWorkerPool {
    pub fn spawn(worker_count: usize, ctx: Arc<WorkerContext>) -> Self {
        let token = CancellationToken::new();
        let handles = (0..worker_count)
            .map(|i| {
                let worker_id = format!("worker-{i}");
                let ctx = Arc::clone(&ctx);
                let token = token.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, ctx, token).await;
                })
            })
            .collect();
        Self { token, handles }
    }

    /// Stop claiming and drain in-flight jobs, bounded by the grace period.
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                tracing::warn!("Render worker did not drain within grace period");
            }
        }
    }
}

async fn worker_loop(worker_id: String, ctx: Arc<WorkerContext>, token: CancellationToken) {
    tracing::debug!(worker = %worker_id, "Render worker started");
    loop {
        if token.is_cancelled() {
            break;
        }
        let job = match ctx.queue.claim_next(&worker_id) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(worker = %worker_id, error = %e, "Queue claim failed");
                None
            }
        };

        match job {
            Some(job) => {
                let job_id = job.id;
                let instance_id = job.plugin_instance_id;
                match run_job(&ctx, &job).await {
                    Ok(()) => {
                        if let Err(e) = ctx.queue.complete(job_id, true, None) {
                            tracing::error!(job_id, error = %e, "Failed to complete job");
                        }
                        tracing::info!(worker = %worker_id, job_id, instance_id, "Render job completed");
                    }
                    Err(e) => {
                        tracing::warn!(
                            worker = %worker_id,
                            job_id,
                            instance_id,
                            error = %e,
                            "Render job failed"
                        );
                        if let Err(e) = ctx.queue.complete(job_id, false, Some(&e.to_string())) {
                            tracing::error!(job_id, error = %e, "Failed to record job failure");
                        }
                    }
                }
            }
            None => {
                let backoff = idle_backoff();
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
    tracing::debug!(worker = %worker_id, "Render worker stopped");
}

fn idle_backoff() -> Duration {
    use rand::Rng;
    let ms = rand::thread_rng().gen_range(IDLE_BACKOFF_MIN_MS..=IDLE_BACKOFF_MAX_MS);
    Duration::from_millis(ms)
}

/// Execute one claimed job end to end.
async fn run_job(ctx: &WorkerContext, job: &RenderJob) -> Result<(), RenderError> {
    let instance = ctx
        .store
        .get_plugin_instance(job.plugin_instance_id)?
        .ok_or_else(|| {
            RenderError::UnknownPlugin(format!("instance {} is gone", job.plugin_instance_id))
        })?;
    let plugin = ctx
        .registry
        .get(&instance.plugin_type)
        .ok_or_else(|| RenderError::UnknownPlugin(instance.plugin_type.clone()))?;

    let device = ctx.store.device_for_instance(instance.id)?;
    let model = match &device {
        Some(d) => ctx.store.model_for_device(d)?,
        None => crate::models::DeviceModel::fallback(),
    };
    let mut dims = ctx.store.dimensions_for_instance(instance.id)?;
    if dims.is_empty() {
        dims.push((model.width, model.height, model.bit_depth));
    }

    let plugin_ctx = PluginContext {
        device,
        settings: instance.settings.clone(),
        model,
        instance: instance.clone(),
    };

    let response = tokio::time::timeout(JOB_DEADLINE, plugin.process(&plugin_ctx))
        .await
        .map_err(|_| RenderError::Timeout)??;

    match response {
        PluginResponse::Data { data, template, .. } => {
            for (width, height, bit_depth) in dims {
                let document = ctx.html.render_document(&template, &data, width, height)?;
                let bytes = ctx.rasterizer.render(&document, width, height).await?;
                write_artifact(ctx, &instance.plugin_type, instance.id, width, height, bit_depth, &bytes)
                    .await?;
            }
        }
        PluginResponse::Image {
            source: ImageSource::Bytes(bytes),
            ..
        } => {
            for (width, height, bit_depth) in dims {
                write_artifact(ctx, &instance.plugin_type, instance.id, width, height, bit_depth, &bytes)
                    .await?;
            }
        }
        PluginResponse::Image {
            source: ImageSource::Url(url),
            ..
        } => {
            // Nothing to persist on disk; record the remote location.
            let hash = content_hash(url.as_bytes());
            for (width, height, bit_depth) in dims {
                let key = ArtifactKey {
                    plugin_instance_id: instance.id,
                    width,
                    height,
                    bit_depth,
                };
                if let Some(old) = ctx.store.upsert_artifact(&key, &url, &hash, Utc::now())? {
                    remove_stale_file(ctx, &old).await;
                }
            }
        }
    }
    Ok(())
}

/// Persist bytes under a unique name, then swap the row. The old file is
/// unlinked only after the row points at the new one.
async fn write_artifact(
    ctx: &WorkerContext,
    plugin_type: &str,
    instance_id: i64,
    width: u32,
    height: u32,
    bit_depth: u32,
    bytes: &[u8],
) -> Result<(), RenderError> {
    let relative = format!("rendered/{plugin_type}/{}.png", uuid::Uuid::new_v4());
    let absolute = ctx.static_dir.join(&relative);
    if let Some(parent) = absolute.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&absolute, bytes).await?;

    let key = ArtifactKey {
        plugin_instance_id: instance_id,
        width,
        height,
        bit_depth,
    };
    let hash = content_hash(bytes);
    let replaced = ctx.store.upsert_artifact(&key, &relative, &hash, Utc::now())?;
    if let Some(old) = replaced {
        remove_stale_file(ctx, &old).await;
    }
    Ok(())
}

async fn remove_stale_file(ctx: &WorkerContext, relative: &str) {
    if relative.starts_with("http://") || relative.starts_with("https://") {
        return;
    }
    let path = ctx.static_dir.join(relative);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale artifact");
        }
    }
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(&hasher.finalize()[..16])
}
