use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PRIORITY_NORMAL: i64 = 0;
pub const PRIORITY_IMMEDIATE: i64 = 100;

/// Render job lifecycle.
///
/// `pending → running → {completed | failed}`, with `failed → pending` on
/// retry and `pending → cancelled` as the only external transition. A
/// running job is never cancelled; the worker finishes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// One entry in the durable render queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderJob {
    pub id: i64,
    pub plugin_instance_id: i64,
    pub priority: i64,
    pub scheduled_for: DateTime<Utc>,
    pub status: JobStatus,
    pub attempts: u32,
    pub worker_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
