//! Notification events emitted by the pipeline.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{JobId, Stage};

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    StageStarted,
    Complete,
    Failed,
    /// Returned to the queue after a worker interruption
    Requeued,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::StageStarted => "stage_started",
            NotificationKind::Complete => "complete",
            NotificationKind::Failed => "failed",
            NotificationKind::Requeued => "requeued",
        }
    }
}

/// Event envelope handed to a notification sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NotificationEvent {
    pub job_id: JobId,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(job_id: JobId, kind: NotificationKind, payload: serde_json::Value) -> Self {
        Self {
            job_id,
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn stage_started(job_id: JobId, stage: Stage, attempt: u32) -> Self {
        Self::new(
            job_id,
            NotificationKind::StageStarted,
            serde_json::json!({ "stage": stage, "attempt": attempt }),
        )
    }

    pub fn complete(job_id: JobId, output_ref: &str) -> Self {
        Self::new(
            job_id,
            NotificationKind::Complete,
            serde_json::json!({ "outputRef": output_ref }),
        )
    }

    pub fn failed(job_id: JobId, stage: Stage, error: &str) -> Self {
        Self::new(
            job_id,
            NotificationKind::Failed,
            serde_json::json!({ "stage": stage, "error": error }),
        )
    }

    pub fn requeued(job_id: JobId, stage: Stage) -> Self {
        Self::new(
            job_id,
            NotificationKind::Requeued,
            serde_json::json!({ "stage": stage }),
        )
    }
}
