//! Queue error types.

use thiserror::Error;
use vscrub_models::{JobId, WorkerId};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Lease on job {job_id} is not held by {worker_id}")]
    LeaseLost { job_id: JobId, worker_id: WorkerId },

    #[error("Malformed queue data: {0}")]
    Malformed(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn lease_lost(job_id: &JobId, worker_id: &WorkerId) -> Self {
        Self::LeaseLost {
            job_id: job_id.clone(),
            worker_id: worker_id.clone(),
        }
    }

    pub fn is_lease_lost(&self) -> bool {
        matches!(self, QueueError::LeaseLost { .. })
    }
}
