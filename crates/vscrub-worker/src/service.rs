//! Caller surface: submit, status and cancel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::{Validate, ValidationError};
use vscrub_models::{Job, JobId, JobStatus, JobStatusView, Mode, SegmentationPoint, Tier};
use vscrub_queue::JobQueue;
use vscrub_store::{update_where, Guarded, JobRecordStore};

use crate::error::{WorkerError, WorkerResult, CANCELLED};
use crate::metrics;

/// A new processing request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[validate(length(min = 1, max = 128))]
    pub owner_id: String,
    #[serde(default)]
    pub tier: Tier,
    pub mode: Mode,
    #[validate(length(min = 1, max = 1024))]
    pub input_ref: String,
    #[validate(custom(function = "validate_point"))]
    pub segmentation_point: SegmentationPoint,
}

fn validate_point(point: &SegmentationPoint) -> Result<(), ValidationError> {
    if point.is_normalized() {
        Ok(())
    } else {
        Err(ValidationError::new("point_out_of_range"))
    }
}

/// Acknowledgement of a cancel request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAck {
    pub job_id: JobId,
    /// Status after the request; a job that already finished keeps its status
    pub status: JobStatus,
    /// Whether this request changed the job
    pub cancelled: bool,
}

pub struct JobService {
    store: Arc<dyn JobRecordStore>,
    queue: Arc<dyn JobQueue>,
    default_batch_size: u32,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobRecordStore>,
        queue: Arc<dyn JobQueue>,
        default_batch_size: u32,
    ) -> Self {
        Self {
            store,
            queue,
            default_batch_size,
        }
    }

    /// Create a job record and enqueue it.
    pub async fn submit(&self, request: SubmitRequest) -> WorkerResult<JobId> {
        request
            .validate()
            .map_err(|e| WorkerError::validation(e.to_string()))?;

        let job = Job::new(
            request.owner_id,
            request.tier,
            request.mode,
            request.input_ref,
            request.segmentation_point,
            self.default_batch_size,
        );
        let job_id = self.store.create(job).await?;

        if let Err(e) = self.queue.enqueue(&job_id, request.tier.priority_score()).await {
            // Without an entry nothing would ever pick the job up.
            warn!(job_id = %job_id, "Enqueue failed, failing job: {}", e);
            let failed = update_where(
                self.store.as_ref(),
                &job_id,
                3,
                |j| !j.is_terminal(),
                |j: &mut Job| j.fail("enqueue failed"),
            )
            .await;
            if let Err(store_err) = failed {
                warn!(job_id = %job_id, "Failed to mark job failed: {}", store_err);
            }
            return Err(e.into());
        }

        metrics::record_job_submitted(request.tier.as_str());
        info!(job_id = %job_id, tier = request.tier.as_str(), mode = request.mode.as_str(), "Job submitted");
        Ok(job_id)
    }

    pub async fn get_status(&self, job_id: &JobId) -> WorkerResult<JobStatusView> {
        let job = self.store.get(job_id).await?;
        Ok(JobStatusView::from(&job))
    }

    /// Mark a job Failed with reason "cancelled".
    ///
    /// A worker running the job notices at its next checkpoint and drops its
    /// result. Cancelling a finished job is a no-op.
    pub async fn cancel(&self, job_id: &JobId) -> WorkerResult<CancelAck> {
        let result = update_where(
            self.store.as_ref(),
            job_id,
            10,
            |j| !j.is_terminal(),
            |j: &mut Job| j.fail(CANCELLED),
        )
        .await?;

        let cancelled = result.is_applied();
        if cancelled {
            metrics::record_job_cancelled();
            info!(job_id = %job_id, "Job cancelled");
        }

        Ok(CancelAck {
            job_id: job_id.clone(),
            status: result.job().status,
            cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vscrub_queue::InMemoryJobQueue;
    use vscrub_store::InMemoryJobStore;

    fn service() -> (JobService, Arc<InMemoryJobQueue>) {
        let queue = Arc::new(InMemoryJobQueue::default());
        let service = JobService::new(Arc::new(InMemoryJobStore::new()), queue.clone(), 16);
        (service, queue)
    }

    fn request() -> SubmitRequest {
        SubmitRequest {
            owner_id: "user-1".to_string(),
            tier: Tier::Priority,
            mode: Mode::Blur,
            input_ref: "uploads/a.mp4".to_string(),
            segmentation_point: SegmentationPoint::new(0, 0.25, 0.75),
        }
    }

    #[tokio::test]
    async fn test_submit_creates_and_enqueues() {
        let (service, queue) = service();
        let job_id = service.submit(request()).await.unwrap();

        let status = service.get_status(&job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Queued);
        assert_eq!(status.progress_percent, 0);
        assert_eq!(queue.depth().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_request() {
        let (service, queue) = service();

        let mut bad_point = request();
        bad_point.segmentation_point = SegmentationPoint::new(0, -0.1, 0.5);
        assert!(matches!(service.submit(bad_point).await, Err(WorkerError::Validation(_))));

        let mut no_owner = request();
        no_owner.owner_id = String::new();
        assert!(matches!(service.submit(no_owner).await, Err(WorkerError::Validation(_))));

        assert_eq!(queue.depth().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (service, _) = service();
        let job_id = service.submit(request()).await.unwrap();

        let first = service.cancel(&job_id).await.unwrap();
        assert!(first.cancelled);
        assert_eq!(first.status, JobStatus::Failed);

        let second = service.cancel(&job_id).await.unwrap();
        assert!(!second.cancelled);
        assert_eq!(second.status, JobStatus::Failed);

        let status = service.get_status(&job_id).await.unwrap();
        assert_eq!(status.error_detail.as_deref(), Some(CANCELLED));
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (service, _) = service();
        let missing = JobId::from_string("missing");
        assert!(service.get_status(&missing).await.unwrap_err().is_not_found());
        assert!(service.cancel(&missing).await.unwrap_err().is_not_found());
    }
}
