//! Store error types.

use thiserror::Error;
use vscrub_models::JobId;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("Version conflict on job {id}: expected {expected}, found {actual}")]
    VersionConflict { id: JobId, expected: u64, actual: u64 },

    #[error("Job {0} is terminal and cannot be modified")]
    Terminal(JobId),

    #[error("Invalid transition on job {id}: {reason}")]
    InvalidTransition { id: JobId, reason: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn invalid_transition(id: &JobId, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            id: id.clone(),
            reason: reason.into(),
        }
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}
