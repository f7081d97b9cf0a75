//! Structured job logging.
//!
//! Every line carries `job_id`, `stage` and `worker_id` so a single job can
//! be followed across workers and redeliveries.

use tracing::{error, info, warn, Span};
use vscrub_models::{JobId, Stage, WorkerId};

/// Logger for one stage attempt of one job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    stage: Stage,
    worker_id: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, stage: Stage, worker_id: &WorkerId) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage,
            worker_id: worker_id.to_string(),
        }
    }

    pub fn log_start(&self, attempt: u32) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            worker_id = %self.worker_id,
            attempt,
            "Stage started"
        );
    }

    pub fn log_advanced(&self, next: Stage) {
        info!(
            job_id = %self.job_id,
            stage = %self.stage,
            worker_id = %self.worker_id,
            next = %next,
            "Stage completed"
        );
    }

    pub fn log_retry(&self, attempt: u32, delay: std::time::Duration, reason: &str) {
        warn!(
            job_id = %self.job_id,
            stage = %self.stage,
            worker_id = %self.worker_id,
            attempt,
            "Stage failed, retrying in {:?}: {}", delay, reason
        );
    }

    pub fn log_failure(&self, reason: &str) {
        error!(
            job_id = %self.job_id,
            stage = %self.stage,
            worker_id = %self.worker_id,
            "Job failed: {}", reason
        );
    }

    pub fn log_discarded(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            stage = %self.stage,
            worker_id = %self.worker_id,
            "Stage result discarded: {}", message
        );
    }

    pub fn log_completion(&self, output_ref: &str) {
        info!(
            job_id = %self.job_id,
            worker_id = %self.worker_id,
            output_ref,
            "Job completed"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Span wrapping the whole attempt.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "stage_attempt",
            job_id = %self.job_id,
            stage = %self.stage,
            worker_id = %self.worker_id
        )
    }
}
